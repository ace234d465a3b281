// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while parsing a status value from a string.
///
/// Returned by the `FromStr` implementations of [`RunStatus`](crate::RunStatus)
/// and [`TestStatus`](crate::TestStatus).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusParseError {
    kind: &'static str,
    input: String,
    known: &'static [&'static str],
}

impl StatusParseError {
    pub(crate) fn new(
        kind: &'static str,
        input: impl Into<String>,
        known: &'static [&'static str],
    ) -> Self {
        Self {
            kind,
            input: input.into(),
            known,
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unrecognized {} `{}` (known values: {})",
            self.kind,
            self.input,
            self.known.join(", "),
        )
    }
}

impl error::Error for StatusParseError {}
