use crate::state::{ScpOperation, ScpState};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "russh")]
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),
    #[error("remote command was rejected: {0}")]
    ExecRejected(String),
    #[error("channel is closed")]
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum ScpError {
    /// The operation is not permitted in the current state. Nothing was
    /// written or read and the session is unchanged.
    #[error("{operation} called under invalid state {state:?}")]
    InvalidState {
        operation: ScpOperation,
        state: ScpState,
    },
    /// A name or permission string would break the control line framing.
    #[error("invalid {what}: {value:?}")]
    InvalidArgument { what: &'static str, value: String },
    #[error("transport failure during {operation}: {source}")]
    Transport {
        operation: ScpOperation,
        #[source]
        source: TransportError,
    },
    #[error("scp status code {code} not valid{}", reject_suffix(.message))]
    ProtocolReject { code: u8, message: Option<String> },
    #[error("parsing error while parsing message: {line:?}")]
    Parse { line: String },
    #[error("unhandled message: {line:?}")]
    UnsupportedDirective { directive: char, line: String },
    #[error("end of file while reading from the peer")]
    EndOfStream,
}

fn reject_suffix(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

impl ScpError {
    pub(crate) fn transport(operation: ScpOperation, source: TransportError) -> Self {
        Self::Transport { operation, source }
    }

    /// Fatal errors leave the session in [`ScpState::Error`]; it has to be
    /// closed before it can be used again.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidState { .. }
                | Self::InvalidArgument { .. }
                | Self::UnsupportedDirective { .. }
        )
    }
}
