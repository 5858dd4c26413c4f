use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use scpline_protocol::ScpConfig;
use serde::{Deserialize, Serialize};
use tracing::*;

pub(crate) fn _default_ssh_command() -> Vec<String> {
    vec!["ssh".to_owned()]
}

pub(crate) fn _default_file_mode() -> String {
    "0644".to_owned()
}

pub(crate) fn _default_dir_mode() -> String {
    "0755".to_owned()
}

pub(crate) const fn _default_chunk_size() -> usize {
    32 * 1024
}

/// Real `scp` peers expect the full completion handshake.
pub(crate) fn _default_protocol() -> ScpConfig {
    ScpConfig {
        openssh_compat: true,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScplineConfig {
    /// Program and arguments used to reach a remote host. The host and the
    /// scp command are appended.
    #[serde(default = "_default_ssh_command")]
    pub ssh_command: Vec<String>,

    /// Host used for remote paths that do not name one.
    #[serde(default)]
    pub host: Option<String>,

    /// Permissions announced for files whose mode cannot be read locally.
    #[serde(default = "_default_file_mode")]
    pub file_mode: String,

    #[serde(default = "_default_dir_mode")]
    pub dir_mode: String,

    #[serde(default = "_default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "_default_protocol")]
    pub protocol: ScpConfig,
}

impl Default for ScplineConfig {
    fn default() -> Self {
        ScplineConfig {
            ssh_command: _default_ssh_command(),
            host: None,
            file_mode: _default_file_mode(),
            dir_mode: _default_dir_mode(),
            chunk_size: _default_chunk_size(),
            protocol: _default_protocol(),
        }
    }
}

impl ScplineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ssh_command.is_empty() {
            anyhow::bail!("ssh_command must name a program");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must not be zero");
        }
        scpline_protocol::wire::check_permissions(&self.file_mode)
            .context("Invalid file_mode")?;
        scpline_protocol::wire::check_permissions(&self.dir_mode)
            .context("Invalid dir_mode")?;
        self.protocol.validate().context("Invalid protocol settings")?;
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<ScplineConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }

    let config: ScplineConfig = builder
        .add_source(
            Environment::with_prefix("SCPLINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("ssh_command"),
        )
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    config.validate()?;

    match path {
        Some(path) => info!(?path, "Using config"),
        None => debug!("No config file given, using defaults and environment"),
    }
    Ok(config)
}
