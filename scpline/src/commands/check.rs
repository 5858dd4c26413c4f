use anyhow::Result;
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    info!(
        ssh_command = ?config.ssh_command,
        host = ?config.host,
        file_mode = %config.file_mode,
        dir_mode = %config.dir_mode,
        chunk_size = config.chunk_size,
        max_line_length = config.protocol.max_line_length,
        max_read_chunk = config.protocol.max_read_chunk,
        openssh_compat = config.protocol.openssh_compat,
        "Effective configuration"
    );
    info!("No problems found");
    Ok(())
}
