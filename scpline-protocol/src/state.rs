//! SCP session states and the transition table.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Transfer direction, fixed when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScpMode {
    /// Sink: files are pushed to the remote `scp -t`
    Write,
    /// Source: files are pulled from the remote `scp -f`
    Read,
}

impl ScpMode {
    pub fn exec_flag(&self) -> &'static str {
        match self {
            ScpMode::Write => "-t",
            ScpMode::Read => "-f",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScpState {
    /// No channel bound, or just closed
    New,
    /// Sink side ready to receive control lines
    WriteInited,
    /// Streaming a file payload out
    WriteWriting,
    /// Source side ready to offer the next item
    ReadInited,
    /// A file or directory header was parsed, awaiting accept/deny
    ReadRequested,
    /// Streaming a file payload in
    ReadReading,
    /// Unrecoverable, only `close` is permitted
    Error,
}

impl ScpState {
    pub(crate) fn inited(mode: ScpMode) -> Self {
        match mode {
            ScpMode::Write => ScpState::WriteInited,
            ScpMode::Read => ScpState::ReadInited,
        }
    }
}

/// Public engine operations, used as the key of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScpOperation {
    Init,
    Close,
    PushDirectory,
    LeaveDirectory,
    PushFile,
    Write,
    PullRequest,
    DenyRequest,
    AcceptRequest,
    Read,
}

impl ScpOperation {
    /// The single guard consulted at every entry point.
    ///
    /// `Read` is listed for `ReadReading` only: a pending file request is
    /// accepted implicitly before the guard runs.
    pub fn permitted_in(self, state: ScpState) -> bool {
        use ScpState::*;
        matches!(
            (self, state),
            (ScpOperation::Close, _)
                | (ScpOperation::Init, New)
                | (
                    ScpOperation::PushDirectory
                        | ScpOperation::LeaveDirectory
                        | ScpOperation::PushFile,
                    WriteInited
                )
                | (ScpOperation::Write, WriteWriting)
                | (ScpOperation::PullRequest, ReadInited)
                | (
                    ScpOperation::DenyRequest | ScpOperation::AcceptRequest,
                    ReadRequested
                )
                | (ScpOperation::Read, ReadReading)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScpOperation::Init => "init",
            ScpOperation::Close => "close",
            ScpOperation::PushDirectory => "push_directory",
            ScpOperation::LeaveDirectory => "leave_directory",
            ScpOperation::PushFile => "push_file",
            ScpOperation::Write => "write",
            ScpOperation::PullRequest => "pull_request",
            ScpOperation::DenyRequest => "deny_request",
            ScpOperation::AcceptRequest => "accept_request",
            ScpOperation::Read => "read",
        }
    }
}

impl Display for ScpOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScpRequestKind {
    NewFile,
    NewDirectory,
}

/// A file or directory offered by the source: `C<perm> <size> <name>` or
/// `D<perm> 0 <name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScpRequest {
    pub kind: ScpRequestKind,
    pub permissions: String,
    pub size: u64,
    /// Lossy UTF-8 rendering of [`ScpRequest::raw_name`]
    pub name: String,
    /// Name bytes exactly as the source sent them
    #[serde(skip)]
    pub raw_name: Vec<u8>,
}
