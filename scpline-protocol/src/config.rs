use serde::{Deserialize, Serialize};

use crate::wire::MAX_LINE_LENGTH;

pub(crate) const fn _default_false() -> bool {
    false
}

pub(crate) const fn _default_max_line_length() -> usize {
    MAX_LINE_LENGTH
}

pub(crate) const fn _default_max_read_chunk() -> usize {
    64 * 1024
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_line_length must be at least 2 (got {0})")]
    LineLengthTooSmall(usize),
    #[error("max_read_chunk must not be zero")]
    ZeroReadChunk,
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpConfig {
    /// Cap for an inbound control line, terminator included.
    #[serde(default = "_default_max_line_length")]
    pub max_line_length: usize,

    /// Upper bound for a single payload read.
    #[serde(default = "_default_max_read_chunk")]
    pub max_read_chunk: usize,

    /// Speak the full OpenSSH completion handshake: the sink acks first in
    /// read mode, every file payload is followed by a status exchange, and
    /// skipped directives are acknowledged.
    #[serde(default = "_default_false")]
    pub openssh_compat: bool,
}

impl Default for ScpConfig {
    fn default() -> Self {
        ScpConfig {
            max_line_length: _default_max_line_length(),
            max_read_chunk: _default_max_read_chunk(),
            openssh_compat: _default_false(),
        }
    }
}

impl ScpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_line_length < 2 {
            return Err(ConfigError::LineLengthTooSmall(self.max_line_length));
        }
        if self.max_read_chunk == 0 {
            return Err(ConfigError::ZeroReadChunk);
        }
        Ok(())
    }
}
