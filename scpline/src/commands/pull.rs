use std::path::Path;

use anyhow::{Context, Result};
use scpline_protocol::{wire, ScpError, ScpMode, ScpRequestKind, ScpSession, ScpState, ScpTransport};
use tokio::io::AsyncWriteExt;
use tracing::*;

use crate::commands::common::{finish, open_session, RemoteTarget};
use crate::config::{load_config, ScplineConfig};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PullStats {
    pub files: usize,
    pub directories: usize,
    pub denied: usize,
    /// Warnings the source sent instead of a request
    pub remote_errors: usize,
    pub bytes: u64,
}

impl PullStats {
    /// Fails when anything was skipped on either side.
    pub fn check(&self) -> Result<()> {
        if self.remote_errors > 0 {
            anyhow::bail!("Remote scp reported {} error(s)", self.remote_errors);
        }
        if self.denied > 0 {
            anyhow::bail!("{} request(s) were refused", self.denied);
        }
        Ok(())
    }
}

/// Maps a name offered by the source to a single local path component.
/// Names that would climb out of the current directory are refused.
pub(crate) fn local_component(name: &str) -> Option<&str> {
    let name = wire::basename(name);
    match name {
        "" | "." | ".." | "/" | "\\" => None,
        name => Some(name),
    }
}

/// Consumes requests until the source closes the stream.
///
/// The engine has no notion of nesting, so the current local directory is
/// tracked here: `D` pushes onto the stack and the end-of-directory
/// directive pops it.
pub(crate) async fn pull<T: ScpTransport>(
    session: &mut ScpSession<T>,
    config: &ScplineConfig,
    destination: &Path,
) -> Result<PullStats> {
    let mut stats = PullStats::default();
    let mut dirs = vec![destination.to_path_buf()];
    let mut buf = vec![0u8; config.chunk_size];

    loop {
        let kind = match session.pull_request().await {
            Ok(kind) => kind,
            Err(ScpError::UnsupportedDirective { directive: 'E', .. }) => {
                if dirs.len() > 1 {
                    dirs.pop();
                } else {
                    warn!("Source left a directory it never entered");
                }
                continue;
            }
            Err(ScpError::UnsupportedDirective {
                directive: directive @ ('\u{1}' | '\u{2}'),
                line,
            }) => {
                let message = line.trim_start_matches(['\u{1}', '\u{2}']);
                if directive == '\u{2}' {
                    anyhow::bail!("Remote scp: {message}");
                }
                warn!(%message, "Remote scp");
                stats.remote_errors += 1;
                continue;
            }
            Err(ScpError::UnsupportedDirective { directive, .. }) => {
                debug!(%directive, "Ignoring directive");
                continue;
            }
            Err(ScpError::EndOfStream) => break,
            Err(error) => return Err(error).context("Could not read the next request"),
        };

        let offered = session.request_filename().unwrap_or_default().to_owned();
        let Some(name) = local_component(&offered) else {
            warn!(name=%offered, "Refusing unsafe name");
            session
                .deny_request(&format!("scpline: refusing to write {offered:?}"))
                .await?;
            stats.denied += 1;
            continue;
        };
        let current = dirs.last().cloned().unwrap_or_else(|| destination.to_path_buf());
        let path = current.join(name);

        match kind {
            ScpRequestKind::NewDirectory => {
                if let Err(error) = tokio::fs::create_dir_all(&path).await {
                    error!(?path, %error, "Could not create directory");
                    session
                        .deny_request(&format!("scpline: {}: {error}", path.display()))
                        .await?;
                    stats.denied += 1;
                    continue;
                }
                session.accept_request().await?;
                debug!(?path, "Entered local directory");
                dirs.push(path);
                stats.directories += 1;
            }
            ScpRequestKind::NewFile => {
                let file = match tokio::fs::File::create(&path).await {
                    Ok(file) => file,
                    Err(error) => {
                        error!(?path, %error, "Could not create file");
                        session
                            .deny_request(&format!("scpline: {}: {error}", path.display()))
                            .await?;
                        stats.denied += 1;
                        continue;
                    }
                };
                let received = receive_file(session, file, &mut buf)
                    .await
                    .with_context(|| format!("Transfer of {path:?} failed"))?;
                apply_permissions(&path, session.request_permissions()).await;
                info!(?path, size = received, "Received");
                stats.files += 1;
                stats.bytes += received;
            }
        }
    }
    Ok(stats)
}

async fn receive_file<T: ScpTransport>(
    session: &mut ScpSession<T>,
    mut file: tokio::fs::File,
    buf: &mut [u8],
) -> Result<u64> {
    let mut received = 0u64;
    // The first read accepts the request
    while matches!(
        session.state(),
        ScpState::ReadRequested | ScpState::ReadReading
    ) {
        let n = session.read(buf).await?;
        file.write_all(&buf[..n]).await?;
        received += n as u64;
    }
    file.flush().await?;
    Ok(received)
}

#[cfg(unix)]
async fn apply_permissions(path: &Path, perms: Option<&str>) {
    use std::os::unix::fs::PermissionsExt;
    let Some(mode) = perms.and_then(|p| u32::from_str_radix(p, 8).ok()) else {
        return;
    };
    let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
    if let Err(error) = tokio::fs::set_permissions(path, permissions).await {
        warn!(?path, %error, "Could not apply permissions");
    }
}

#[cfg(not(unix))]
async fn apply_permissions(_path: &Path, _perms: Option<&str>) {}

pub(crate) async fn command(
    cli: &crate::Cli,
    remote: &str,
    local: &Path,
    recursive: bool,
) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let target = RemoteTarget::parse(remote, &config);

    tokio::fs::create_dir_all(local)
        .await
        .with_context(|| format!("Could not create {local:?}"))?;

    let mut session = open_session(&config, &target, ScpMode::Read, recursive).await?;
    let result = pull(&mut session, &config, local).await;
    let stats = match result {
        Ok(stats) => {
            finish(session, Ok(())).await?;
            stats
        }
        Err(error) => return finish(session, Err(error)).await,
    };

    info!(
        files = stats.files,
        directories = stats.directories,
        denied = stats.denied,
        remote_errors = stats.remote_errors,
        bytes = stats.bytes,
        "Pull complete"
    );
    stats.check()
}
