//! Filters and the host restrictions recorded next to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A regex rule feeding one bucket. Immutable once written.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct BucketFilter {
    pub id: Uuid,

    /// Owning bucket.
    pub bucket_id: Uuid,

    /// Regex source exactly as the operator supplied it.
    pub filter: String,

    /// Whether filter usage counts should be maintained on matches.
    pub report: bool,

    pub created_at: DateTime<Utc>,
}

/// Limits a bucket's filters to events coming from `host`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct HostRestriction {
    pub bucket_id: Uuid,
    pub host: String,
}
