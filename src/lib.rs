//! Register regex filters against event buckets and backfill unclassified
//! events with them.

pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod runner;
pub mod services;

pub use config::{Args, Registration};
pub use errors::{ImportError, ImportResult};
pub use runner::run_registration;
pub use services::{
    classifier_service::{BackfillStats, ClassifierService, ImportSummary},
    validator::ValidatedFilter,
};
