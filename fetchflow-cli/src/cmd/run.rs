use std::path::PathBuf;
use std::sync::Arc;

use fetchflow_core::{BatchSummary, FetchParams, FetchResult};
use fetchflow_exec::executor::{
    BatchReport, CompositeEventSink, ExecutionError, MetricsCollector, MetricsEventSink, Orchestrator, PerfLogSink,
    TracingEventSink,
};
use fetchflow_exec::ratelimit::build_rate_limiter;
use fetchflow_store::{open_pool, SqlitePool};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::{apply_overrides, load_config};
use super::items;
use super::progress::ProgressEventSink;
use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::utils::{parse_key_value, parse_sources};
use crate::{ConfigArgs, DispatchArgs, FetchArgs, OutputArgs, StoreArgs};

pub struct RunRequest {
    pub sources: Vec<String>,
    pub sources_file: Option<PathBuf>,
    pub fetch: FetchArgs,
    pub dispatch: DispatchArgs,
    pub store: StoreArgs,
    pub perf_log: Option<PathBuf>,
    pub progress: bool,
    pub config: ConfigArgs,
    pub output: OutputArgs,
}

#[derive(Serialize)]
struct FailedSource<'a> {
    source: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    batch_id: String,
    summary: &'a BatchSummary,
    failed: Vec<FailedSource<'a>>,
    persisted_rows: u64,
    metrics: serde_json::Value,
    results: &'a [FetchResult],
}

pub async fn run_cmd(req: RunRequest) -> i32 {
    let output = req.output.clone();

    let Some(mut config) = load_config(&req.config, &output) else {
        return exit_codes::CONFIG_INVALID;
    };
    apply_overrides(&mut config, &req.fetch, &req.dispatch, &req.store);
    if let Err(e) = config.validate() {
        print_error(output.format, output.quiet, &e.to_string());
        return exit_codes::CONFIG_INVALID;
    }

    let mut sources = req.sources.clone();
    if let Some(path) = &req.sources_file {
        match std::fs::read_to_string(path) {
            Ok(content) => sources.extend(parse_sources(&content)),
            Err(e) => {
                print_error(
                    output.format,
                    output.quiet,
                    &format!("failed to read {}: {e}", path.display()),
                );
                return exit_codes::CONFIG_INVALID;
            }
        }
    }
    if sources.is_empty() {
        print_error(output.format, output.quiet, "no sources given");
        return exit_codes::CONFIG_INVALID;
    }

    let mut params = FetchParams::new(req.fetch.limit);
    for raw in &req.fetch.options {
        match parse_key_value(raw) {
            Some((k, v)) => params = params.with_option(k, v),
            None => {
                print_error(output.format, output.quiet, &format!("invalid --option '{raw}', expected KEY=VALUE"));
                return exit_codes::CONFIG_INVALID;
            }
        }
    }

    let Some(fetcher) = config.process_fetcher() else {
        print_error(
            output.format,
            output.quiet,
            "no fetch command. Set --fetch-command or worker_command in the config file",
        );
        return exit_codes::CONFIG_INVALID;
    };
    let orchestrator_config = match config.orchestrator_config() {
        Ok(c) => c,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return exit_codes::CONFIG_INVALID;
        }
    };

    let limiter = build_rate_limiter(&config.rate_limit_config()).await;
    let breakers = Arc::new(config.breaker_registry());

    let collector = Arc::new(MetricsCollector::new());
    let mut sinks = CompositeEventSink::new().with(Arc::new(TracingEventSink));
    if req.progress && !output.quiet {
        sinks.add(Arc::new(ProgressEventSink::new()));
    }
    if let Some(path) = &req.perf_log {
        match PerfLogSink::open(path).await {
            Ok(sink) => sinks.add(Arc::new(sink)),
            Err(e) => {
                print_error(
                    output.format,
                    output.quiet,
                    &format!("failed to open perf log {}: {e}", path.display()),
                );
                return exit_codes::RUNTIME_ERROR;
            }
        }
    }
    let event_sink = MetricsEventSink::new(collector.clone(), Arc::new(sinks));

    let token = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(orchestrator_config, Arc::new(fetcher), limiter, breakers)
        .with_event_sink(Arc::new(event_sink))
        .with_cancellation(token.clone());

    let mut pool: Option<SqlitePool> = None;
    if let Some(path) = &config.store.path {
        let opened = match open_pool(path, config.pool_config(), &config.sqlite_tuning()).await {
            Ok(p) => p,
            Err(e) => {
                print_error(
                    output.format,
                    output.quiet,
                    &format!("failed to open store {}: {e}", path.display()),
                );
                return exit_codes::RUNTIME_ERROR;
            }
        };
        if let Err(e) = items::ensure_schema(&opened).await {
            print_error(output.format, output.quiet, &format!("failed to prepare store: {e}"));
            return exit_codes::RUNTIME_ERROR;
        }
        let sink = items::record_sink(opened.clone(), config.store.batch_size, config.lock_retry());
        orchestrator = orchestrator.with_sink(Arc::new(sink));
        pool = Some(opened);
    }

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling batch");
            token.cancel();
        }
    });

    info!(sources = sources.len(), strategy = ?config.strategy, "running batch");
    let outcome = orchestrator.run_batch(sources, &params).await;
    interrupt.abort();
    if let Some(pool) = pool {
        pool.close();
    }

    let metrics = collector.get_metrics().await.to_json();
    match outcome {
        Ok(report) => {
            report_batch(&report, metrics, &output);
            if report.summary.all_succeeded() {
                exit_codes::SUCCESS
            } else {
                exit_codes::PARTIAL_FAILURE
            }
        }
        Err(e @ ExecutionError::Config(_)) => {
            print_error(output.format, output.quiet, &e.to_string());
            exit_codes::CONFIG_INVALID
        }
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            exit_codes::RUNTIME_ERROR
        }
    }
}

fn report_batch(report: &BatchReport, metrics: serde_json::Value, output: &OutputArgs) {
    let failed: Vec<FailedSource<'_>> = report
        .results
        .iter()
        .filter(|r| !r.success)
        .map(|r| FailedSource {
            source: &r.source,
            status: r.status().as_str(),
            error: r.error.as_ref().map(|e| e.to_string()),
        })
        .collect();

    if output.format == OutputFormat::Json {
        print_result(
            output.format,
            output.quiet,
            &RunOutput {
                batch_id: report.batch_id.to_string(),
                summary: &report.summary,
                failed,
                persisted_rows: report.persisted_rows,
                metrics,
                results: &report.results,
            },
        );
        return;
    }
    if output.quiet {
        return;
    }

    let s = &report.summary;
    println!("Batch {}", report.batch_id);
    println!(
        "  {} of {} sources succeeded ({:.1}%), {} items",
        s.succeeded, s.total, s.success_rate, s.total_items
    );
    if s.rejected > 0 || s.invalid > 0 {
        println!("  {} rejected by open breakers, {} invalid", s.rejected, s.invalid);
    }
    println!(
        "  {:.2}s fetch time, {:.1} items/s",
        s.total_duration.as_secs_f64(),
        s.items_per_second
    );
    if report.persisted_rows > 0 {
        println!("  {} rows written", report.persisted_rows);
    }
    if !failed.is_empty() {
        println!("Failed sources:");
        for f in &failed {
            match &f.error {
                Some(e) => println!("  ✗ {} ({}): {e}", f.source, f.status),
                None => println!("  ✗ {} ({})", f.source, f.status),
            }
        }
    }
}
