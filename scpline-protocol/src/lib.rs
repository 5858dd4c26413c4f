//! SCP sub-protocol engine
//!
//! Drives the legacy `scp -t` / `scp -f` wire dialect over an already
//! authenticated, already open byte channel.

mod channel;
mod config;
mod error;
#[cfg(test)]
mod mock;
mod process;
mod session;
#[cfg(feature = "russh")]
mod ssh;
mod state;
pub mod wire;

pub use channel::{ScpChannel, ScpTransport};
pub use config::{ConfigError, ScpConfig};
pub use error::{ScpError, TransportError};
pub use process::{CommandChannel, CommandTransport};
pub use session::ScpSession;
#[cfg(feature = "russh")]
pub use ssh::{RusshChannel, RusshTransport};
pub use state::{ScpMode, ScpOperation, ScpRequest, ScpRequestKind, ScpState};
