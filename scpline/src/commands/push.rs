use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use scpline_protocol::{ScpMode, ScpSession, ScpTransport};
use tokio::io::AsyncReadExt;
use tracing::*;

use crate::commands::common::{finish, open_session, RemoteTarget};
use crate::config::{load_config, ScplineConfig};

const WINDOW_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushStep {
    Enter(PathBuf),
    File(PathBuf),
    Leave,
}

enum Visit {
    Path(PathBuf),
    Leave,
}

/// Flattens a local tree into the order the sink expects: every `Enter` is
/// matched by a `Leave` once the directory's entries have been listed.
/// Entries are visited in name order.
pub(crate) async fn plan(root: &Path, recursive: bool) -> Result<Vec<PushStep>> {
    let mut steps = vec![];
    let mut stack = vec![Visit::Path(root.to_path_buf())];

    while let Some(visit) = stack.pop() {
        let path = match visit {
            Visit::Leave => {
                steps.push(PushStep::Leave);
                continue;
            }
            Visit::Path(path) => path,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Could not stat {path:?}"))?;
        if metadata.is_file() {
            steps.push(PushStep::File(path));
        } else if metadata.is_dir() {
            if !recursive {
                anyhow::bail!("{path:?} is a directory (use --recursive)");
            }
            let mut entries = vec![];
            let mut dir = tokio::fs::read_dir(&path)
                .await
                .with_context(|| format!("Could not list {path:?}"))?;
            while let Some(entry) = dir.next_entry().await? {
                entries.push(entry.path());
            }
            entries.sort();

            steps.push(PushStep::Enter(path));
            stack.push(Visit::Leave);
            stack.extend(entries.into_iter().rev().map(Visit::Path));
        } else {
            warn!(?path, "Skipping special file");
        }
    }
    Ok(steps)
}

#[cfg(unix)]
fn permissions(metadata: &Metadata, _fallback: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:04o}", metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions(_metadata: &Metadata, fallback: &str) -> String {
    fallback.to_owned()
}

fn local_name(path: &Path) -> Result<String> {
    // `.` and `..` only have a name once resolved
    let resolved = match path.file_name() {
        Some(_) => path.to_path_buf(),
        None => std::fs::canonicalize(path)?,
    };
    resolved
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .with_context(|| format!("{path:?} has no usable file name"))
}

pub(crate) async fn push<T: ScpTransport>(
    session: &mut ScpSession<T>,
    config: &ScplineConfig,
    steps: &[PushStep],
) -> Result<()> {
    let mut buf = vec![0u8; config.chunk_size];

    for step in steps {
        match step {
            PushStep::Enter(path) => {
                let metadata = tokio::fs::metadata(path).await?;
                let perms = permissions(&metadata, &config.dir_mode);
                session
                    .push_directory(&local_name(path)?, &perms)
                    .await
                    .with_context(|| format!("Remote refused directory {path:?}"))?;
            }
            PushStep::Leave => session.leave_directory().await?,
            PushStep::File(path) => push_file(session, config, path, &mut buf).await?,
        }
    }
    Ok(())
}

async fn push_file<T: ScpTransport>(
    session: &mut ScpSession<T>,
    config: &ScplineConfig,
    path: &Path,
    buf: &mut [u8],
) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Could not open {path:?}"))?;
    let metadata = file.metadata().await?;
    let size = metadata.len();
    let perms = permissions(&metadata, &config.file_mode);

    session
        .push_file(&local_name(path)?, size, &perms)
        .await
        .with_context(|| format!("Remote refused file {path:?}"))?;

    if size == 0 {
        session.write(&[]).await?;
        return Ok(());
    }

    let mut reader = file.take(size);
    let mut sent = 0u64;
    while sent < size {
        let n = reader.read(buf).await?;
        if n == 0 {
            anyhow::bail!("{path:?} shrank while being sent ({sent} of {size} bytes)");
        }
        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let written = session.write(chunk).await?;
            if written == 0 {
                // Peer window is full
                tokio::time::sleep(WINDOW_RETRY_DELAY).await;
                continue;
            }
            chunk = &chunk[written..];
        }
        sent += n as u64;
    }

    info!(path=?path, size, "Sent");
    Ok(())
}

pub(crate) async fn command(
    cli: &crate::Cli,
    local: &Path,
    remote: &str,
    recursive: bool,
) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let target = RemoteTarget::parse(remote, &config);

    // Walk the tree before talking to the remote end
    let steps = plan(local, recursive).await?;

    let mut session = open_session(&config, &target, ScpMode::Write, recursive).await?;
    let result = push(&mut session, &config, &steps).await;
    finish(session, result).await?;

    let files = steps
        .iter()
        .filter(|s| matches!(s, PushStep::File(_)))
        .count();
    info!(files, destination = %remote, "Push complete");
    Ok(())
}
