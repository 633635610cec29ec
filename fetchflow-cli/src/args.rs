use std::path::PathBuf;

use clap::Args;
use fetchflow_exec::config::StrategyKind;

use crate::output::OutputFormat;

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    /// YAML or JSON configuration file (falls back to FETCHFLOW_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct StoreArgs {
    /// SQLite database for fetched items.
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyArg {
    Threads,
    Processes,
    Cooperative,
}

impl From<StrategyArg> for StrategyKind {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Threads => StrategyKind::Threads,
            StrategyArg::Processes => StrategyKind::Processes,
            StrategyArg::Cooperative => StrategyKind::Cooperative,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// Worker command run once per fetch.
    #[arg(long)]
    pub fetch_command: Option<String>,
    #[arg(long = "fetch-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub fetch_args: Vec<String>,
    #[arg(long, default_value_t = 100)]
    pub limit: u32,
    #[arg(long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct DispatchArgs {
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
    /// Worker count (or concurrent fetches for the cooperative strategy).
    #[arg(long)]
    pub max_workers: Option<usize>,
    /// Calls per second; 0 disables limiting.
    #[arg(long)]
    pub rate: Option<f64>,
    #[arg(long)]
    pub adaptive: bool,
    #[arg(long)]
    pub no_retry: bool,
}
