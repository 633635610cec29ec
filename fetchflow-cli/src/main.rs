use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod args;
mod cmd;
mod commands;
mod exit_codes;
mod output;
mod utils;

pub use args::*;
use commands::Command;

#[derive(Debug, Parser)]
#[command(name = "fetchflow", version, about = "Resilient concurrent fetch runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.command.output().quiet { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {e}");
            std::process::exit(exit_codes::RUNTIME_ERROR);
        }
    };

    let exit_code = rt.block_on(run_command(cli.command));
    std::process::exit(exit_code);
}

async fn run_command(command: Command) -> i32 {
    match command {
        Command::Run {
            sources,
            sources_file,
            fetch,
            dispatch,
            store,
            perf_log,
            progress,
            config,
            output,
        } => {
            cmd::run::run_cmd(cmd::run::RunRequest {
                sources,
                sources_file,
                fetch,
                dispatch,
                store,
                perf_log,
                progress,
                config,
                output,
            })
            .await
        }
        Command::Config { config, output } => cmd::config::config_cmd(config, output),
        Command::Doctor {
            store,
            fetch_command,
            config,
            output,
        } => cmd::doctor::doctor_cmd(store, fetch_command, config, output).await,
    }
}
