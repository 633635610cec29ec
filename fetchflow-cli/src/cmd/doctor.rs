use std::path::{Path, PathBuf};
use std::time::Duration;

use fetchflow_exec::config::{FetchflowConfig, RateLimitMode};
use fetchflow_exec::ratelimit::RedisIssueClock;
use fetchflow_store::open_pool;
use serde::Serialize;

use crate::exit_codes;
use crate::output::{print_result, OutputFormat};
use crate::utils::redact_url_password;
use crate::{ConfigArgs, OutputArgs, StoreArgs};

const REDIS_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct Check {
    name: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Check {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, "ok", message)
    }

    fn warning(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, "warning", message)
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, "error", message)
    }

    fn new(name: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            message: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct DoctorResult {
    checks: Vec<Check>,
    all_passed: bool,
}

pub async fn doctor_cmd(store: StoreArgs, fetch_command: Option<String>, config: ConfigArgs, output: OutputArgs) -> i32 {
    let mut checks = Vec::new();

    let loaded = FetchflowConfig::load_or_default(config.config.as_deref());
    let effective = match loaded {
        Ok(c) => {
            checks.push(Check::ok("config", describe_config_source(config.config.as_deref())));
            c
        }
        Err(e) => {
            checks.push(Check::error("config", e.to_string()));
            FetchflowConfig::default()
        }
    };

    checks.push(check_fetch_command(fetch_command.as_deref().or(effective.worker_command.as_deref())));
    checks.push(check_store(store.db.as_ref().or(effective.store.path.as_ref()), &effective).await);
    if effective.rate_limit.mode == RateLimitMode::Distributed {
        checks.push(check_redis(&effective).await);
    }

    // Warnings flag optional pieces that are not configured.
    let all_passed = checks.iter().all(|c| c.status != "error");
    let result = DoctorResult { checks, all_passed };

    if output.format == OutputFormat::Text && !output.quiet {
        println!("Environment checks:");
        for c in &result.checks {
            let icon = match c.status.as_str() {
                "ok" => "✓",
                "warning" => "!",
                _ => "✗",
            };
            print!("  {} {}: {}", icon, c.name, c.status);
            if let Some(msg) = &c.message {
                print!(" - {msg}");
            }
            println!();
        }
        if result.all_passed {
            println!("\nAll checks passed.");
        } else {
            println!("\nSome checks failed.");
        }
    } else {
        print_result(output.format, output.quiet, &result);
    }

    if all_passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::RUNTIME_ERROR
    }
}

fn describe_config_source(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("loaded {}", p.display()),
        None => match std::env::var(fetchflow_exec::config::CONFIG_ENV) {
            Ok(p) if !p.is_empty() => format!("loaded {p}"),
            _ => "using defaults".to_string(),
        },
    }
}

fn check_fetch_command(command: Option<&str>) -> Check {
    let Some(command) = command else {
        return Check::warning("fetch_command", "no fetch command configured");
    };
    match resolve_program(command) {
        Some(path) => Check::ok("fetch_command", format!("found {}", path.display())),
        None => Check::error("fetch_command", format!("'{command}' not found")),
    }
}

/// Resolves `program` the way process spawning does: paths are checked
/// directly, bare names are looked up on PATH.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

async fn check_store(path: Option<&PathBuf>, config: &FetchflowConfig) -> Check {
    let Some(path) = path else {
        return Check::warning("store", "no database configured (results are not persisted)");
    };
    match open_pool(path, config.pool_config(), &config.sqlite_tuning()).await {
        Ok(pool) => {
            let stats = pool.stats();
            pool.close();
            Check::ok(
                "store",
                format!("{} (max {} connections)", path.display(), stats.max_connections),
            )
        }
        Err(e) => Check::error("store", format!("{}: {e}", path.display())),
    }
}

async fn check_redis(config: &FetchflowConfig) -> Check {
    let url = &config.rate_limit.redis_url;
    let shown = redact_url_password(url);
    let probe = RedisIssueClock::connect(url, config.rate_limit.key.clone());
    match tokio::time::timeout(REDIS_PROBE_TIMEOUT, probe).await {
        Ok(Ok(_)) => Check::ok("redis", format!("connected to {shown}")),
        Ok(Err(e)) => Check::error("redis", format!("{shown}: {e}")),
        Err(_) => Check::error("redis", format!("{shown}: no answer within {REDIS_PROBE_TIMEOUT:?}")),
    }
}
