use anyhow::Result;
use scpline_protocol::{CommandTransport, ScpMode, ScpSession};
use tracing::*;

use crate::config::ScplineConfig;

/// `[host:]path` as given on the command line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RemoteTarget {
    pub host: Option<String>,
    pub path: String,
}

impl RemoteTarget {
    /// A `host:` prefix is recognized when the part before the first colon
    /// contains no path separator. Without one the configured default host
    /// applies, and without that the scp command runs locally.
    pub fn parse(arg: &str, config: &ScplineConfig) -> Self {
        if let Some((host, path)) = arg.split_once(':') {
            if !host.is_empty() && !host.contains(['/', '\\']) {
                return RemoteTarget {
                    host: Some(host.to_owned()),
                    path: if path.is_empty() { ".".into() } else { path.into() },
                };
            }
        }
        RemoteTarget {
            host: config.host.clone(),
            path: arg.to_owned(),
        }
    }

    pub fn transport(&self, config: &ScplineConfig) -> Result<CommandTransport> {
        let Some(host) = &self.host else {
            return Ok(CommandTransport::local());
        };
        let Some((program, args)) = config.ssh_command.split_first() else {
            anyhow::bail!("ssh_command is empty");
        };
        let mut args = args.to_vec();
        args.push(host.clone());
        Ok(CommandTransport::new(program.clone(), args))
    }

    /// Location handed to the remote scp, with `-r` when directories may be
    /// transferred.
    pub fn location(&self, recursive: bool) -> String {
        if recursive {
            format!("-r {}", self.path)
        } else {
            self.path.clone()
        }
    }
}

pub(crate) async fn open_session(
    config: &ScplineConfig,
    target: &RemoteTarget,
    mode: ScpMode,
    recursive: bool,
) -> Result<ScpSession<CommandTransport>> {
    let mut session = ScpSession::with_config(
        target.transport(config)?,
        mode,
        target.location(recursive),
        config.protocol.clone(),
    );
    info!(host=?target.host, path=%target.path, ?mode, "Connecting");
    if let Err(error) = session.init().await {
        // The session is in the error state; closing releases the process
        let _ = session.close().await;
        return Err(anyhow::Error::new(error).context("Could not start remote scp"));
    }
    Ok(session)
}

/// Closes the session and reports the first of the transfer and teardown
/// errors.
pub(crate) async fn finish<T: scpline_protocol::ScpTransport>(
    mut session: ScpSession<T>,
    result: Result<()>,
) -> Result<()> {
    let closed = session.close().await;
    result?;
    closed?;
    Ok(())
}
