use fetchflow_exec::config::{FetchflowConfig, RateLimitMode, StrategyKind};

use crate::exit_codes;
use crate::output::{print_error, OutputFormat};
use crate::utils::redact_url_password;
use crate::{ConfigArgs, DispatchArgs, FetchArgs, OutputArgs, StoreArgs};

pub fn load_config(config: &ConfigArgs, output: &OutputArgs) -> Option<FetchflowConfig> {
    match FetchflowConfig::load_or_default(config.config.as_deref()) {
        Ok(c) => Some(c),
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            None
        }
    }
}

/// Layers command-line flags over the loaded file.
pub fn apply_overrides(config: &mut FetchflowConfig, fetch: &FetchArgs, dispatch: &DispatchArgs, store: &StoreArgs) {
    if let Some(command) = &fetch.fetch_command {
        config.worker_command = Some(command.clone());
        config.worker_args = fetch.fetch_args.clone();
    }
    if let Some(strategy) = dispatch.strategy {
        config.strategy = strategy.into();
    }
    if let Some(n) = dispatch.max_workers {
        match config.strategy {
            StrategyKind::Cooperative => config.max_concurrent = n,
            _ => config.max_workers = n,
        }
    }
    if let Some(rate) = dispatch.rate {
        config.rate_limit.rate = rate;
    }
    if dispatch.adaptive {
        config.rate_limit.mode = RateLimitMode::Adaptive;
    }
    if dispatch.no_retry {
        config.retry.enabled = false;
    }
    if let Some(db) = &store.db {
        config.store.path = Some(db.clone());
    }
}

pub fn config_cmd(config: ConfigArgs, output: OutputArgs) -> i32 {
    let Some(mut effective) = load_config(&config, &output) else {
        return exit_codes::CONFIG_INVALID;
    };
    effective.rate_limit.redis_url = redact_url_password(&effective.rate_limit.redis_url);

    if output.quiet {
        return exit_codes::SUCCESS;
    }
    let rendered = match output.format {
        OutputFormat::Text => serde_yaml::to_string(&effective).map_err(|e| e.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(&effective).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(s) => {
            println!("{}", s.trim_end());
            exit_codes::SUCCESS
        }
        Err(e) => {
            print_error(output.format, output.quiet, &format!("failed to render config: {e}"));
            exit_codes::RUNTIME_ERROR
        }
    }
}
