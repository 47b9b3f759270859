//! Failure kinds raised while parsing, replaying, and verifying a chapter.
//!
//! Every kind is fatal for the chapter run. Listing-level failures carry a
//! [`ListingContext`] so the offending block can be found in the book source.
use crate::listing::Listing;
use std::fmt;
use thiserror::Error;

/// Where a failure happened in the listing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingContext {
    pub position: usize,
    pub kind: &'static str,
    pub snippet: String,
    pub line: Option<usize>,
}

impl ListingContext {
    pub fn new(position: usize, listing: &Listing) -> Self {
        Self {
            position,
            kind: listing.kind().tag(),
            snippet: listing.snippet(),
            line: listing.annotations().line,
        }
    }
}

impl fmt::Display for ListingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listing {} ({}", self.position, self.kind)?;
        if let Some(line) = self.line {
            write!(f, ", line {line}")?;
        }
        write!(f, ") {:?}", self.snippet)
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Chapter text or block data could not be turned into listings.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Markers on one block contradict each other.
    #[error("ambiguous classification at line {line}: {message}")]
    ClassificationAmbiguity { line: usize, message: String },

    #[error("invalid skip directive for listing {position}: {reason}")]
    InvalidDirective { position: usize, reason: String },

    #[error("invalid start position {position}: {reason}")]
    InvalidStart { position: usize, reason: String },

    /// A skip directive no longer matches the book text.
    #[error("{context}: skip directive expected {expected:?} in listing text")]
    ContractMismatch {
        context: ListingContext,
        expected: String,
    },

    #[error("{context}: sandbox failure (exit {exit_code:?}): {message}\n{stderr}")]
    SandboxExecution {
        context: ListingContext,
        exit_code: Option<i32>,
        message: String,
        stderr: String,
    },

    #[error("{context}: output does not match\n{diff}")]
    OutputMismatch {
        context: ListingContext,
        diff: String,
    },

    /// A code listing differs from the file committed for its git ref.
    #[error("{context}: code differs from {filename}\n{diff}")]
    CodeMismatch {
        context: ListingContext,
        filename: String,
        diff: String,
    },

    #[error("{context}: listing was never replayed or skipped")]
    CoverageGap { context: ListingContext },

    #[error("final diff against reference is not empty\n{hunk}")]
    FinalDiffMismatch { hunk: String },

    /// Sandbox failure outside any listing (start checkout, final commit).
    #[error("sandbox {operation} failed: {message}")]
    SandboxSetup { operation: String, message: String },
}

impl ReplayError {
    /// Listing position the failure points at, when there is one.
    pub fn position(&self) -> Option<usize> {
        match self {
            ReplayError::InvalidDirective { position, .. }
            | ReplayError::InvalidStart { position, .. } => Some(*position),
            ReplayError::ContractMismatch { context, .. }
            | ReplayError::SandboxExecution { context, .. }
            | ReplayError::OutputMismatch { context, .. }
            | ReplayError::CodeMismatch { context, .. }
            | ReplayError::CoverageGap { context } => Some(context.position),
            ReplayError::Parse { .. }
            | ReplayError::ClassificationAmbiguity { .. }
            | ReplayError::FinalDiffMismatch { .. }
            | ReplayError::SandboxSetup { .. } => None,
        }
    }

    pub(crate) fn sandbox(context: ListingContext, err: &anyhow::Error) -> Self {
        ReplayError::SandboxExecution {
            context,
            exit_code: None,
            message: format!("{err:#}"),
            stderr: String::new(),
        }
    }

    pub(crate) fn setup(operation: &str, err: &anyhow::Error) -> Self {
        ReplayError::SandboxSetup {
            operation: operation.to_string(),
            message: format!("{err:#}"),
        }
    }
}
