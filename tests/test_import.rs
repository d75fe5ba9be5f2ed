use bucket_filter::{
    Args, ClassifierService, ImportError, Registration, ValidatedFilter, db,
    models::{bucket::Bucket, event::Event},
    progress::NoProgress,
    run_registration,
};
use clap::Parser;
use sqlx::SqlitePool;
use std::{io::Cursor, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

async fn setup(events: &[&str]) -> (TempDir, Arc<SqlitePool>) {
    let tmp = TempDir::new().unwrap();
    let url = format!("sqlite://{}", tmp.path().join("events.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    for event in events {
        sqlx::query("INSERT INTO events (event) VALUES (?)")
            .bind(*event)
            .execute(&pool)
            .await
            .unwrap();
    }
    (tmp, Arc::new(pool))
}

fn registration(bucket: &str, pattern: &str) -> Registration {
    Registration {
        bucket_name: bucket.to_string(),
        filter_pattern: pattern.to_string(),
        self_test: false,
        ..Registration::default()
    }
}

async fn all_events(pool: &SqlitePool) -> Vec<Event> {
    sqlx::query_as("SELECT id, event, bucket_id FROM events ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_new_bucket_backfills_matching_events() {
    let (_tmp, pool) = setup(&["ERROR: disk full", "INFO: ok", "ERROR: oom"]).await;
    let service = ClassifierService::new(pool.clone());
    let reg = registration("errors", "ERROR");
    let filter = ValidatedFilter::compile(&reg.filter_pattern).unwrap();

    let summary = service.import(&reg, &filter, &NoProgress).await.unwrap();

    assert!(summary.bucket_created);
    let stats = summary.backfill.unwrap();
    assert_eq!(stats.to_string(), "(matched 2 of 3)");

    let events = all_events(&pool).await;
    let tagged: Vec<&str> = events
        .iter()
        .filter(|e| e.bucket_id == Some(summary.bucket.id))
        .map(|e| e.event.as_str())
        .collect();
    assert_eq!(tagged, vec!["ERROR: disk full", "ERROR: oom"]);
    assert_eq!(events.iter().filter(|e| !e.is_classified()).count(), 1);

    let bucket: Bucket = sqlx::query_as(
        "SELECT id, name, eat_it, report_it, created_at FROM buckets WHERE name = 'errors'",
    )
    .fetch_one(&*pool)
    .await
    .unwrap();
    assert_eq!(bucket.id, summary.bucket.id);
    assert!(bucket.eat_it && bucket.report_it);
}

#[tokio::test]
async fn test_rerun_appends_filter_to_existing_bucket() {
    let (_tmp, pool) = setup(&["ERROR: disk full", "INFO: ok"]).await;
    let service = ClassifierService::new(pool.clone());
    let reg = registration("errors", "ERROR");
    let filter = ValidatedFilter::compile(&reg.filter_pattern).unwrap();

    let first = service.import(&reg, &filter, &NoProgress).await.unwrap();
    let second = service.import(&reg, &filter, &NoProgress).await.unwrap();

    assert_eq!(first.bucket.id, second.bucket.id);
    assert!(!second.bucket_created);
    assert_eq!(count(&pool, "buckets").await, 1);
    assert_eq!(count(&pool, "filters").await, 2);

    // Nothing left to claim on the second pass.
    let stats = second.backfill.unwrap();
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.matched, 0);
}

#[tokio::test]
async fn test_classified_events_are_left_alone() {
    let (_tmp, pool) = setup(&[]).await;
    let service = ClassifierService::new(pool.clone());

    let info_filter = ValidatedFilter::compile("INFO").unwrap();
    let other = service
        .import(&registration("infos", "INFO"), &info_filter, &NoProgress)
        .await
        .unwrap();

    sqlx::query("INSERT INTO events (event, bucket_id) VALUES ('ERROR: already filed', ?)")
        .bind(other.bucket.id)
        .execute(&*pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO events (event) VALUES ('ERROR: already filed')")
        .execute(&*pool)
        .await
        .unwrap();

    let error_filter = ValidatedFilter::compile("ERROR").unwrap();
    let summary = service
        .import(&registration("errors", "ERROR"), &error_filter, &NoProgress)
        .await
        .unwrap();
    assert_eq!(summary.backfill.unwrap().events_tagged, 1);

    let owners: Vec<Option<Uuid>> = all_events(&pool)
        .await
        .into_iter()
        .map(|e| e.bucket_id)
        .collect();
    assert_eq!(owners, vec![Some(other.bucket.id), Some(summary.bucket.id)]);
}

#[tokio::test]
async fn test_apply_false_registers_without_backfill() {
    let (_tmp, pool) = setup(&["ERROR: disk full"]).await;
    let service = ClassifierService::new(pool.clone());
    let reg = Registration {
        apply: false,
        eat_it: false,
        only_on: vec!["web1".into()],
        ..registration("errors", "ERROR")
    };

    let summary = service
        .import(&reg, &ValidatedFilter::compile("ERROR").unwrap(), &NoProgress)
        .await
        .unwrap();

    assert!(summary.backfill.is_none());
    assert!(!summary.bucket.eat_it);
    assert_eq!(summary.hosts, vec!["web1"]);
    assert_eq!(count(&pool, "onlyon").await, 1);
    assert!(all_events(&pool).await.iter().all(|e| !e.is_classified()));
}

#[tokio::test]
async fn test_failed_update_rolls_back_everything() {
    let (_tmp, pool) = setup(&["ERROR: disk full", "ERROR: oom", "INFO: ok"]).await;
    sqlx::query(
        "CREATE TRIGGER refuse_oom BEFORE UPDATE ON events
         WHEN NEW.event = 'ERROR: oom'
         BEGIN SELECT RAISE(ABORT, 'refusing to tag oom'); END",
    )
    .execute(&*pool)
    .await
    .unwrap();

    let service = ClassifierService::new(pool.clone());
    let reg = Registration {
        only_on: vec!["web1".into(), "web2".into()],
        ..registration("errors", "ERROR")
    };

    let err = service
        .import(&reg, &ValidatedFilter::compile("ERROR").unwrap(), &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::UpdateFailed { ref event, .. } if event == "ERROR: oom"));
    assert_eq!(err.exit_code(), 3);

    assert_eq!(count(&pool, "buckets").await, 0);
    assert_eq!(count(&pool, "filters").await, 0);
    assert_eq!(count(&pool, "onlyon").await, 0);
    assert!(all_events(&pool).await.iter().all(|e| !e.is_classified()));
}

fn cli_args(extra: &[&str]) -> Args {
    let mut argv = vec!["bucket-filter", "--bucket-name", "errors"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

fn db_url(tmp: &TempDir) -> String {
    format!("sqlite://{}", tmp.path().join("events.db").display())
}

#[tokio::test]
async fn test_invalid_pattern_stops_before_the_store() {
    let (tmp, pool) = setup(&["ERROR: disk full"]).await;
    let args = cli_args(&["--bucket-filter", "[", "--test-data", "false"]);

    let err = run_registration(
        &args,
        &db_url(&tmp),
        &mut Cursor::new(""),
        &mut Vec::new(),
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ImportError::InvalidPattern { ref pattern, .. } if pattern == "["));
    assert_eq!(err.exit_code(), 2);

    assert_eq!(count(&pool, "buckets").await, 0);
    assert_eq!(count(&pool, "filters").await, 0);
    assert!(all_events(&pool).await.iter().all(|e| !e.is_classified()));
}

#[tokio::test]
async fn test_invalid_pattern_never_opens_a_connection() {
    // The database is unreachable, so getting the pattern error back shows
    // validation finished before any connect was attempted.
    let args = cli_args(&["--bucket-filter", "[", "--test-data", "false"]);

    let err = run_registration(
        &args,
        "sqlite:///definitely/missing/dir/events.db",
        &mut Cursor::new(""),
        &mut Vec::new(),
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ImportError::InvalidPattern { .. }));
}

#[tokio::test]
async fn test_failed_self_test_writes_nothing() {
    let (tmp, pool) = setup(&["ERROR: disk full"]).await;
    let args = cli_args(&["--bucket-filter", "^WARN"]);
    let mut out = Vec::new();

    let err = run_registration(
        &args,
        &db_url(&tmp),
        &mut Cursor::new("ERROR: disk full\n"),
        &mut out,
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, ImportError::SelfTestFailed { ref test_text, .. } if test_text == "ERROR: disk full")
    );
    assert_eq!(err.exit_code(), 4);
    assert!(String::from_utf8(out).unwrap().contains("test line"));

    assert_eq!(count(&pool, "buckets").await, 0);
    assert_eq!(count(&pool, "filters").await, 0);
    assert!(all_events(&pool).await.iter().all(|e| !e.is_classified()));
}

#[tokio::test]
async fn test_failed_self_test_never_opens_a_connection() {
    let args = cli_args(&["--bucket-filter", "^WARN"]);

    let err = run_registration(
        &args,
        "sqlite:///definitely/missing/dir/events.db",
        &mut Cursor::new("ERROR: disk full\n"),
        &mut Vec::new(),
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ImportError::SelfTestFailed { .. }));
}

#[tokio::test]
async fn test_prompted_filter_is_tested_then_imported() {
    let (tmp, pool) = setup(&["ERROR: disk full", "INFO: ok"]).await;
    let args = cli_args(&["--only-on", "web1"]);
    let mut out = Vec::new();

    let summary = run_registration(
        &args,
        &db_url(&tmp),
        &mut Cursor::new("ERROR\nERROR: disk\n full\n"),
        &mut out,
        &NoProgress,
    )
    .await
    .unwrap();

    assert_eq!(summary.filter.filter, "ERROR");
    assert_eq!(summary.hosts, vec!["web1"]);
    assert_eq!(summary.backfill.unwrap().to_string(), "(matched 1 of 2)");
    let prompts = String::from_utf8(out).unwrap();
    assert!(prompts.contains("bucket filter"));
    assert!(prompts.contains("test line"));

    assert_eq!(count(&pool, "buckets").await, 1);
    assert_eq!(count(&pool, "onlyon").await, 1);
}
