//! Represents a bucket: a named classification target for events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A classification bucket.
///
/// `name` is the natural key. `id` is assigned when the bucket is first
/// created and never changes afterwards. The two policy flags are consumed
/// by the live classifier, not by this tool.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Bucket {
    /// Stable identifier referenced by filters, host restrictions and events.
    pub id: Uuid,

    /// Unique bucket name.
    pub name: String,

    /// On a match, stop passing the event on to other buckets.
    pub eat_it: bool,

    /// Record matches for this bucket.
    pub report_it: bool,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
