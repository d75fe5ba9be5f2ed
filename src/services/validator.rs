//! Pre-commit regex validation. Pure: never touches the store.

use crate::errors::{ImportError, ImportResult};
use regex::Regex;

/// A filter whose pattern is known to compile. Only validated filters can
/// be registered or used for a backfill.
#[derive(Debug, Clone)]
pub struct ValidatedFilter {
    pattern: String,
    regex: Regex,
}

impl ValidatedFilter {
    /// Compile `pattern`, failing with `InvalidPattern` on a syntax error.
    pub fn compile(pattern: &str) -> ImportResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| ImportError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Require the pattern to match the operator's sample text.
    pub fn self_test(&self, test_text: &str) -> ImportResult<()> {
        if self.regex.is_match(test_text) {
            Ok(())
        } else {
            Err(ImportError::SelfTestFailed {
                pattern: self.pattern.clone(),
                test_text: test_text.to_string(),
            })
        }
    }

    pub fn is_match(&self, event: &str) -> bool {
        self.regex.is_match(event)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
