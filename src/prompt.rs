//! Line-oriented operator input: the filter prompt and the self-test text.

use crate::errors::{ImportError, ImportResult};
use std::io::{self, BufRead, Write};

/// A source of input lines with terminators stripped.
pub trait LineSource {
    /// Next line, or `None` at end of input.
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

impl<R: BufRead> LineSource for R {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// Ask for a bucket filter and read one line of it.
pub fn read_filter(input: &mut impl LineSource, out: &mut impl Write) -> ImportResult<String> {
    if let Err(err) = write!(out, "I need a bucket filter, so give me one now: ")
        .and_then(|()| out.flush())
    {
        tracing::debug!("couldn't write the filter prompt: {}", err);
    }

    match input.next_line() {
        Ok(Some(line)) if !line.trim().is_empty() => Ok(line),
        Ok(_) => Err(ImportError::InputMissing("bucket filter")),
        Err(err) => {
            tracing::warn!("couldn't read a filter from stdin: {}", err);
            Err(ImportError::InputMissing("bucket filter"))
        }
    }
}

/// Read test lines until end of input and join them without separators.
pub fn read_test_text(input: &mut impl LineSource, out: &mut impl Write) -> ImportResult<String> {
    if let Err(err) = writeln!(
        out,
        "Give me a test line to make sure the regex you gave me does what you want it to:"
    )
    .and_then(|()| out.flush())
    {
        tracing::debug!("couldn't write the test line prompt: {}", err);
    }

    let mut text = String::new();
    loop {
        match input.next_line() {
            Ok(Some(line)) => text.push_str(&line),
            Ok(None) => return Ok(text),
            Err(err) => {
                tracing::warn!("couldn't read a test line from stdin: {}", err);
                return Err(ImportError::InputMissing("readable test line"));
            }
        }
    }
}
