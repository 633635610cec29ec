use std::time::Duration;

use fetchflow_core::{FetchError, FetchParams};
use fetchflow_exec::fetcher::{BlockingFetcher, Fetcher, OffloadBlocking, ProcessFetcher, DEFAULT_DEPENDENCY};
use serde_json::{json, Value};

struct SyncClient;

impl BlockingFetcher for SyncClient {
    fn fetch_blocking(&self, source: &str, params: &FetchParams) -> Result<Vec<Value>, FetchError> {
        if source == "explode" {
            panic!("client state corrupted");
        }
        std::thread::sleep(Duration::from_millis(10));
        Ok(vec![json!({"source": source, "limit": params.limit})])
    }

    fn dependency(&self) -> &str {
        "legacy_api"
    }
}

#[tokio::test]
async fn blocking_clients_run_off_the_runtime() {
    let fetcher = OffloadBlocking::new(SyncClient);
    assert_eq!(fetcher.dependency(), "legacy_api");

    let items = fetcher.fetch("feed", &FetchParams::new(7)).await.unwrap();
    assert_eq!(items, vec![json!({"source": "feed", "limit": 7})]);

    let err = fetcher.fetch("explode", &FetchParams::default()).await.unwrap_err();
    match err {
        FetchError::Worker { message } => assert!(message.contains("client state corrupted")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[cfg(unix)]
mod process {
    use super::*;

    fn sh(script: &str) -> ProcessFetcher {
        ProcessFetcher::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn request_goes_in_on_stdin() {
        // Echo the request back as the single item.
        let fetcher = sh(r#"read -r req; printf '[%s]' "$req""#);
        assert_eq!(fetcher.dependency(), DEFAULT_DEPENDENCY);

        let params = FetchParams::new(3).with_option("lang", "en");
        let items = fetcher.fetch("news", &params).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["source"], "news");
        assert_eq!(items[0]["params"]["limit"], 3);
        assert_eq!(items[0]["params"]["options"]["lang"], "en");
    }

    #[tokio::test]
    async fn typed_errors_pass_through() {
        let fetcher = sh(r#"cat >/dev/null; echo '{"error": {"kind": "rate_limited", "message": "429"}}'"#)
            .with_dependency("search_api");
        assert_eq!(fetcher.dependency(), "search_api");
        let err = fetcher.fetch("q", &FetchParams::default()).await.unwrap_err();
        assert_eq!(err, FetchError::rate_limited("429"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_worker_error_with_stderr() {
        let fetcher = sh("cat >/dev/null; echo 'no credentials' >&2; exit 3");
        match fetcher.fetch("q", &FetchParams::default()).await.unwrap_err() {
            FetchError::Worker { message } => {
                assert!(message.contains("status 3"), "{message}");
                assert!(message.contains("no credentials"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_workers_time_out_as_transient() {
        let fetcher = sh("sleep 5").with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = fetcher.fetch("q", &FetchParams::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_program_is_a_worker_error() {
        let fetcher = ProcessFetcher::new("/nonexistent/fetch-worker");
        let err = fetcher.fetch("q", &FetchParams::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::Worker { .. }));
    }
}
