//! Core data models for the event-classification store.
//!
//! These entities map to the `buckets`, `filters`, `onlyon` and `events`
//! tables via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bucket;
pub mod event;
pub mod filter;
