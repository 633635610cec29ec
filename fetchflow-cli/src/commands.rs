use std::path::PathBuf;

use clap::Subcommand;

use crate::args::*;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every source once (plus one retry pass) and report.
    Run {
        sources: Vec<String>,
        #[arg(long)]
        sources_file: Option<PathBuf>,
        #[command(flatten)]
        fetch: FetchArgs,
        #[command(flatten)]
        dispatch: DispatchArgs,
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        perf_log: Option<PathBuf>,
        #[arg(long)]
        progress: bool,
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print the effective configuration.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Check that the store and worker command are usable.
    Doctor {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        fetch_command: Option<String>,
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

impl Command {
    pub fn output(&self) -> &OutputArgs {
        match self {
            Command::Run { output, .. } | Command::Config { output, .. } | Command::Doctor { output, .. } => output,
        }
    }
}
