//! One operator run: a validation phase with no store access, then the
//! transactional import.

use crate::{
    config::{Args, Registration},
    db,
    errors::ImportResult,
    progress::ProgressReporter,
    prompt::{self, LineSource},
    services::{
        classifier_service::{ClassifierService, ImportSummary},
        validator::ValidatedFilter,
    },
};
use std::{io::Write, sync::Arc};

/// Validate the registration described by `args`, then connect to `db_url`
/// and import it.
///
/// The filter (prompted for on `input` when absent) is compiled and, when
/// self-test is on, checked against the test text before any connection is
/// opened. A bad pattern or a failed self-test leaves the store untouched.
pub async fn run_registration(
    args: &Args,
    db_url: &str,
    input: &mut impl LineSource,
    out: &mut impl Write,
    progress: &dyn ProgressReporter,
) -> ImportResult<ImportSummary> {
    let mut registration = Registration::from_args(args)?;
    if registration.filter_pattern.is_empty() {
        registration.filter_pattern = prompt::read_filter(input, out)?;
    }
    let filter = ValidatedFilter::compile(&registration.filter_pattern)?;

    if registration.self_test {
        let test_text = prompt::read_test_text(input, out)?;
        filter.self_test(&test_text)?;
    }

    tracing::info!(
        "Registering filter {:?} for bucket {:?}",
        registration.filter_pattern,
        registration.bucket_name
    );

    let pool = Arc::new(db::connect(db_url).await?);
    let service = ClassifierService::new(pool.clone());
    let summary = service.import(&registration, &filter, progress).await;
    pool.close().await;
    summary
}
