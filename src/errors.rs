//! Failure taxonomy for a single import run.
//!
//! Every variant is terminal for the run: nothing is retried, the open
//! transaction (if any) is rolled back, and the process exits with
//! [`ImportError::exit_code`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I need a config file or database url (use --config, --database-url or BUCKET_FILTER_DATABASE_URL)")]
    ConfigMissing,

    #[error("config file `{}` is invalid: {reason}", path.display())]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("couldn't connect to db `{url}`")]
    ConnectFailed {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("I need a {0}!")]
    InputMissing(&'static str),

    #[error("bucket name `{name}` is invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },

    #[error("regex compile error for `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("looks like your regex `{pattern}` doesn't work for your test case of `{test_text}`")]
    SelfTestFailed { pattern: String, test_text: String },

    #[error("couldn't start transaction to insert new bucket filter")]
    TxStartFailed(#[source] sqlx::Error),

    #[error("couldn't search for existing bucket `{name}`")]
    LookupFailed {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("couldn't insert new bucket `{name}`")]
    BucketInsertFailed {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("couldn't insert new bucket filter `{pattern}`")]
    FilterInsertFailed {
        pattern: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("couldn't insert new bucket host restriction `{host}`")]
    HostInsertFailed {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("couldn't find unclassified events")]
    UnclassifiedQueryFailed(#[source] sqlx::Error),

    #[error("couldn't walk rows while looking for matching events")]
    CursorFailed(#[source] sqlx::Error),

    #[error("couldn't update events matching `{event}`")]
    UpdateFailed {
        event: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("couldn't commit transaction to insert new bucket filter")]
    CommitFailed(#[source] sqlx::Error),
}

pub type ImportResult<T> = Result<T, ImportError>;

impl ImportError {
    /// Process exit status for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::ConfigMissing
            | ImportError::InputMissing(_)
            | ImportError::InvalidBucketName { .. } => 1,
            ImportError::ConfigInvalid { .. }
            | ImportError::ConnectFailed { .. }
            | ImportError::InvalidPattern { .. } => 2,
            ImportError::SelfTestFailed { .. } => 4,
            ImportError::TxStartFailed(_)
            | ImportError::LookupFailed { .. }
            | ImportError::BucketInsertFailed { .. }
            | ImportError::FilterInsertFailed { .. }
            | ImportError::HostInsertFailed { .. }
            | ImportError::UnclassifiedQueryFailed(_)
            | ImportError::CursorFailed(_)
            | ImportError::UpdateFailed { .. }
            | ImportError::CommitFailed(_) => 3,
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
