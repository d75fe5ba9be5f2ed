//! src/services/classifier_service.rs
//!
//! ClassifierService: registers a filter against a bucket and backfills
//! previously unclassified events, all inside one SQLite transaction. Either
//! the bucket, filter, host restrictions and event tags of a run all become
//! visible together, or none of them do.

use crate::{
    config::Registration,
    errors::{ImportError, ImportResult, is_unique_violation},
    models::{
        bucket::Bucket,
        filter::{BucketFilter, HostRestriction},
    },
    progress::ProgressReporter,
    services::validator::ValidatedFilter,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Distinct payloads fetched per scan page.
const SCAN_PAGE_SIZE: i64 = 500;

/// Where a run got to. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Start,
    BucketResolved,
    FilterPersisted,
    BackfillDone,
    Committed,
    Aborted,
}

/// Outcome of find-or-create on a bucket name.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBucket {
    pub bucket: Bucket,
    /// False when the bucket already existed, including when a concurrent
    /// run won the insert.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredFilter {
    pub filter: BucketFilter,
    pub hosts: Vec<HostRestriction>,
}

/// Counters for one backfill pass. `scanned` counts distinct unclassified
/// payloads examined; `events_tagged` counts event rows updated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackfillStats {
    pub scanned: u64,
    pub matched: u64,
    pub events_tagged: u64,
}

impl BackfillStats {
    /// Live status line shown while scanning.
    pub fn progress_line(&self) -> String {
        format!("(matched {} of {} scanned)", self.matched, self.scanned)
    }
}

impl fmt::Display for BackfillStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(matched {} of {})", self.matched, self.scanned)
    }
}

/// Everything a committed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub bucket: Bucket,
    pub bucket_created: bool,
    pub filter: BucketFilter,
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backfill: Option<BackfillStats>,
}

impl ImportSummary {
    /// Operator-facing report.
    pub fn render_text(&self) -> String {
        let mut out = if self.bucket_created {
            format!(
                "Made a new bucket called \"{}\" using filter \"{}\"",
                self.bucket.name, self.filter.filter
            )
        } else {
            format!(
                "Added to bucket called \"{}\" using filter \"{}\"",
                self.bucket.name, self.filter.filter
            )
        };
        if !self.hosts.is_empty() {
            out.push_str(&format!("\n.... but only for {}", self.hosts.join(", ")));
        }
        if let Some(stats) = &self.backfill {
            out.push_str(&format!(
                "\nBackfill {}, {} events reclassified",
                stats, stats.events_tagged
            ));
        }
        out.push_str("\n   done!");
        out
    }

    pub fn render_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize import summary\"}".into())
    }
}

/// ClassifierService drives a filter import:
/// - resolve (find or create) the target bucket
/// - persist the filter and its host restrictions
/// - optionally tag every unclassified event the filter matches
///
/// The steps take a bare connection so they can run inside the caller's
/// transaction; [`ClassifierService::import`] wires them together.
#[derive(Clone)]
pub struct ClassifierService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ClassifierService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Run the whole import in a single transaction and commit it.
    ///
    /// The transaction takes the write lock up front (`BEGIN IMMEDIATE`), so a
    /// concurrent run on the same store waits for this one to commit and then
    /// finds its bucket instead of racing it. Any step failure rolls the
    /// transaction back and is returned as is; nothing from the run stays
    /// visible.
    pub async fn import(
        &self,
        registration: &Registration,
        filter: &ValidatedFilter,
        progress: &dyn ProgressReporter,
    ) -> ImportResult<ImportSummary> {
        let mut tx = self
            .db
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(ImportError::TxStartFailed)?;
        let mut phase = RunPhase::Start;

        let summary =
            match Self::run_steps(&mut *tx, registration, filter, progress, &mut phase).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!("import aborted after {:?}: {}", phase, err);
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("rollback after failed import also failed: {}", rollback_err);
                    }
                    debug!("run phase => {:?}", RunPhase::Aborted);
                    return Err(err);
                }
            };

        tx.commit().await.map_err(ImportError::CommitFailed)?;
        debug!("run phase => {:?}", RunPhase::Committed);
        info!(
            "committed filter `{}` for bucket `{}`",
            summary.filter.filter, summary.bucket.name
        );
        Ok(summary)
    }

    async fn run_steps(
        conn: &mut SqliteConnection,
        registration: &Registration,
        filter: &ValidatedFilter,
        progress: &dyn ProgressReporter,
        phase: &mut RunPhase,
    ) -> ImportResult<ImportSummary> {
        let resolved = Self::resolve_bucket(
            conn,
            &registration.bucket_name,
            registration.eat_it,
            registration.report_it,
        )
        .await?;
        *phase = RunPhase::BucketResolved;

        let registered = Self::register_filter(
            conn,
            &resolved.bucket,
            filter,
            registration.update_counts,
            &registration.only_on,
        )
        .await?;
        *phase = RunPhase::FilterPersisted;

        let backfill = if registration.apply {
            let stats = Self::backfill(conn, resolved.bucket.id, filter, progress).await?;
            *phase = RunPhase::BackfillDone;
            Some(stats)
        } else {
            None
        };

        Ok(ImportSummary {
            bucket: resolved.bucket,
            bucket_created: resolved.created,
            filter: registered.filter,
            hosts: registered.hosts.into_iter().map(|h| h.host).collect(),
            backfill,
        })
    }

    /// Look a bucket up by exact name.
    async fn find_bucket(conn: &mut SqliteConnection, name: &str) -> ImportResult<Option<Bucket>> {
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, eat_it, report_it, created_at FROM buckets WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|source| ImportError::LookupFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Find the bucket called `name`, or create it with the given flags.
    ///
    /// An existing bucket keeps its flags.
    pub async fn resolve_bucket(
        conn: &mut SqliteConnection,
        name: &str,
        eat_it: bool,
        report_it: bool,
    ) -> ImportResult<ResolvedBucket> {
        if let Some(bucket) = Self::find_bucket(conn, name).await? {
            info!("Adding to bucket called `{}` ({})", name, bucket.id);
            return Ok(ResolvedBucket {
                bucket,
                created: false,
            });
        }

        Self::create_bucket(conn, name, eat_it, report_it).await
    }

    /// Insert a new bucket row. If the insert hits the unique constraint on
    /// `name`, another writer created the bucket first and its row is
    /// returned instead.
    async fn create_bucket(
        conn: &mut SqliteConnection,
        name: &str,
        eat_it: bool,
        report_it: bool,
    ) -> ImportResult<ResolvedBucket> {
        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            eat_it,
            report_it,
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO buckets (id, name, eat_it, report_it, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.eat_it)
        .bind(bucket.report_it)
        .bind(bucket.created_at)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => {
                info!("Making a new bucket called `{}` ({})", name, bucket.id);
                Ok(ResolvedBucket {
                    bucket,
                    created: true,
                })
            }
            Err(err) if is_unique_violation(&err) => {
                debug!("bucket `{}` appeared concurrently, re-resolving", name);
                match Self::find_bucket(conn, name).await? {
                    Some(bucket) => Ok(ResolvedBucket {
                        bucket,
                        created: false,
                    }),
                    None => Err(ImportError::BucketInsertFailed {
                        name: name.to_string(),
                        source: err,
                    }),
                }
            }
            Err(source) => Err(ImportError::BucketInsertFailed {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Insert the filter row and one restriction row per host, all bound to
    /// `bucket`.
    pub async fn register_filter(
        conn: &mut SqliteConnection,
        bucket: &Bucket,
        filter: &ValidatedFilter,
        report: bool,
        hosts: &[String],
    ) -> ImportResult<RegisteredFilter> {
        let record = BucketFilter {
            id: Uuid::new_v4(),
            bucket_id: bucket.id,
            filter: filter.pattern().to_string(),
            report,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO filters (id, bucket_id, filter, report, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.bucket_id)
        .bind(&record.filter)
        .bind(record.report)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|source| ImportError::FilterInsertFailed {
            pattern: record.filter.clone(),
            source,
        })?;
        debug!("inserted filter {} for bucket {}", record.id, bucket.id);

        let mut restrictions = Vec::with_capacity(hosts.len());
        for host in hosts {
            sqlx::query("INSERT INTO onlyon (bucket_id, host) VALUES (?, ?)")
                .bind(bucket.id)
                .bind(host)
                .execute(&mut *conn)
                .await
                .map_err(|source| ImportError::HostInsertFailed {
                    host: host.clone(),
                    source,
                })?;
            restrictions.push(HostRestriction {
                bucket_id: bucket.id,
                host: host.clone(),
            });
        }
        if !restrictions.is_empty() {
            info!(".... but only for {}", hosts.join(", "));
        }

        Ok(RegisteredFilter {
            filter: record,
            hosts: restrictions,
        })
    }

    /// Fetch one page of distinct unclassified payloads, ordered, strictly
    /// after `after`.
    async fn unclassified_page(
        conn: &mut SqliteConnection,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT event FROM events WHERE bucket_id IS NULL",
        );
        if let Some(last) = after {
            builder.push(" AND event > ");
            builder.push_bind(last.to_owned());
        }
        builder.push(" ORDER BY event ASC LIMIT ");
        builder.push_bind(limit);

        builder.build_query_scalar().fetch_all(&mut *conn).await
    }

    /// Tag every unclassified event matching `filter` with `bucket_id`.
    ///
    /// Walks distinct payloads page by page inside the caller's transaction
    /// and tests each payload once. A match updates every still-unclassified
    /// event carrying that exact payload. Events inserted by other writers
    /// after a page was read are not guaranteed to be picked up.
    pub async fn backfill(
        conn: &mut SqliteConnection,
        bucket_id: Uuid,
        filter: &ValidatedFilter,
        progress: &dyn ProgressReporter,
    ) -> ImportResult<BackfillStats> {
        progress.begin("Looking for unclassified events for this new filter:");

        let mut stats = BackfillStats::default();
        let mut after: Option<String> = None;
        let mut first_page = true;

        loop {
            let page = Self::unclassified_page(conn, after.as_deref(), SCAN_PAGE_SIZE)
                .await
                .map_err(|source| {
                    if first_page {
                        ImportError::UnclassifiedQueryFailed(source)
                    } else {
                        ImportError::CursorFailed(source)
                    }
                })?;
            if first_page {
                progress.begin("Matching events:");
                first_page = false;
            }

            let page_len = page.len();
            for event in page {
                stats.scanned += 1;

                if filter.is_match(&event) {
                    stats.matched += 1;
                    let result = sqlx::query(
                        "UPDATE events SET bucket_id = ? WHERE bucket_id IS NULL AND event = ?",
                    )
                    .bind(bucket_id)
                    .bind(&event)
                    .execute(&mut *conn)
                    .await
                    .map_err(|source| ImportError::UpdateFailed {
                        event: event.clone(),
                        source,
                    })?;
                    stats.events_tagged += result.rows_affected();
                    debug!("tagged {} events matching {:?}", result.rows_affected(), event);
                }

                progress.update(&stats.progress_line());
                after = Some(event);
            }

            if (page_len as i64) < SCAN_PAGE_SIZE {
                break;
            }
        }

        progress.finish(&stats.progress_line());
        info!(
            "backfill for bucket {} finished {}, {} events tagged",
            bucket_id, stats, stats.events_tagged
        );
        Ok(stats)
    }
}
