mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::logging::init_logging;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML config file; `SCPLINE_*` environment variables override it
    #[arg(long, short, env = "SCPLINE_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
pub(crate) enum Commands {
    /// Send a local file or tree to `[host:]path`
    Push {
        local: PathBuf,
        remote: String,
        #[arg(long, short)]
        recursive: bool,
    },
    /// Fetch `[host:]path` into a local directory
    Pull {
        remote: String,
        local: PathBuf,
        #[arg(long, short)]
        recursive: bool,
    },
    /// Validate configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Push {
            local,
            remote,
            recursive,
        } => crate::commands::push::command(&cli, local, remote, *recursive).await,
        Commands::Pull {
            remote,
            local,
            recursive,
        } => crate::commands::pull::command(&cli, remote, local, *recursive).await,
        Commands::Check => crate::commands::check::command(&cli).await,
    }
}
