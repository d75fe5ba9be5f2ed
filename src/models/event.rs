//! Represents a stored event as the ingestion path writes it.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An event row. `bucket_id` is `None` while the event is unclassified and
/// is set exactly once, by whichever filter claims it first.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Event {
    pub id: i64,
    pub event: String,
    pub bucket_id: Option<Uuid>,
}

impl Event {
    pub fn is_classified(&self) -> bool {
        self.bucket_id.is_some()
    }
}
