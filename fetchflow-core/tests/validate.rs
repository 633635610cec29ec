use fetchflow_core::{validate_source, FetchParams, FetchTask, Validate, MAX_FETCH_LIMIT};

#[test]
fn task_ids_are_unique_per_position() {
    let a = FetchTask::new(0, "rust", FetchParams::default());
    let b = FetchTask::new(1, "rust", FetchParams::default());
    assert_ne!(a.id, b.id);
    assert_eq!(a.id, "task_0_rust");
    assert_eq!(a.attempt, 0);

    let retry = a.for_retry();
    assert_eq!(retry.id, a.id);
    assert_eq!(retry.attempt, 1);
}

#[test]
fn valid_task_passes() {
    let task = FetchTask::new(
        3,
        "r/programming",
        FetchParams::new(50).with_option("sort", "hot"),
    );
    assert!(task.validate().is_ok());
}

#[test]
fn collects_every_violation() {
    let mut params = FetchParams::new(0);
    params.options.insert("bad key".to_string(), "x".to_string());
    let task = FetchTask::new(0, " spaced out", params);

    let err = task.validate().unwrap_err();
    let paths: Vec<&str> = err.violations.iter().map(|v| v.path.as_str()).collect();
    assert!(paths.contains(&"source"));
    assert!(paths.contains(&"params.limit"));
    assert!(paths.contains(&"params.options.bad key"));
}

#[test]
fn limit_bounds() {
    assert!(FetchParams::new(MAX_FETCH_LIMIT).validate().is_ok());
    assert!(FetchParams::new(MAX_FETCH_LIMIT + 1).validate().is_err());
}

#[test]
fn source_rules() {
    assert!(validate_source("news").is_ok());
    assert!(validate_source("channel:42").is_ok());
    assert!(validate_source("").is_err());
    assert!(validate_source("-leading-dash").is_err());
    assert!(validate_source(&"x".repeat(101)).is_err());
}
