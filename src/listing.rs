//! Typed listings parsed from a chapter.
//!
//! A listing is created once by the classifier and never changes afterwards; the
//! fields are private so replay code can only read them.
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// When a git-reference command checks out its commit relative to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutTiming {
    Before,
    After,
}

/// Closed set of listing roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingKind {
    /// Source code written into a file of the sample project.
    CodeListing { filename: String },
    /// Source code whose authoritative version lives in a historical commit.
    CodeListingWithGitRef { filename: String, commit_ref: String },
    /// Shell command run verbatim.
    Command,
    /// Shell command invoking a known tool such as a test runner.
    ToolCommand { tool: String },
    /// Shell command tied to a commit that is checked out around it.
    GitRefCommand {
        commit_ref: String,
        checkout: CheckoutTiming,
    },
    /// Terminal output expected from the most recent command.
    Output,
    /// Narrative annotation inside a console block.
    Comment,
    /// Anything else; narrative only.
    Other,
}

impl ListingKind {
    /// Human-readable tag used in logs and error messages.
    pub fn tag(&self) -> &'static str {
        match self {
            ListingKind::CodeListing { .. } => "code listing",
            ListingKind::CodeListingWithGitRef { .. } => "code listing with git ref",
            ListingKind::Command => "other command",
            ListingKind::ToolCommand { .. } => "tool command",
            ListingKind::GitRefCommand { .. } => "git ref command",
            ListingKind::Output => "output",
            ListingKind::Comment => "comment",
            ListingKind::Other => "other",
        }
    }
}

/// Directives extracted from block markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    /// Replay this listing before the one preceding it.
    #[serde(default)]
    pub dofirst: bool,
    /// A non-zero exit is shown in the book and must not fail the run.
    #[serde(default)]
    pub ignore_errors: bool,
    /// The code listing only asserts what the file currently contains.
    #[serde(default)]
    pub current_contents: bool,
    /// The markup itself marks this listing as not replayable.
    #[serde(default)]
    pub skipme: bool,
    /// Expected output attached directly to a command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// 1-based line of the block in the chapter source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    kind: ListingKind,
    content: String,
    annotations: Annotations,
}

impl Listing {
    pub fn new(kind: ListingKind, content: impl Into<String>, annotations: Annotations) -> Self {
        Self {
            kind,
            content: content.into(),
            annotations,
        }
    }

    pub fn kind(&self) -> &ListingKind {
        &self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// First line of the content, bounded, for error messages and reports.
    pub fn snippet(&self) -> String {
        let first = self.content.lines().next().unwrap_or_default();
        let mut snippet = crate::util::truncate_string(first, SNIPPET_MAX_BYTES);
        if snippet.len() < self.content.trim_end().len() {
            snippet.push_str(" ...");
        }
        snippet
    }
}

const SNIPPET_MAX_BYTES: usize = 80;

/// Ordered listings of one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ListingSequence {
    listings: Vec<Listing>,
}

impl ListingSequence {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self { listings }
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Listing> {
        self.listings.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listing> {
        self.listings.iter()
    }
}

impl Index<usize> for ListingSequence {
    type Output = Listing;

    fn index(&self, position: usize) -> &Listing {
        &self.listings[position]
    }
}

impl FromIterator<Listing> for ListingSequence {
    fn from_iter<I: IntoIterator<Item = Listing>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
