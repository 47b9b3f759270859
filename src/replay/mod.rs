//! Sequential replay of a chapter's listings against a sandbox.
//!
//! The engine owns a cursor into an immutable [`ListingSequence`] and the set
//! of positions already accounted for. Each step consumes the listing under the
//! cursor (or the cursor listing and its `dofirst` successor), so every
//! position is handled at most once and the cursor never moves backwards.
mod code;
mod dispatch;
mod output;

pub use output::{NormalizerSpec, OutputMatcher};

use crate::error::{ListingContext, ReplayError};
use crate::listing::{Listing, ListingSequence};
use crate::sandbox::{CommandOutput, Sandbox};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    Ready,
    Running,
    Done,
}

/// How a position came to be accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Replayed,
    /// Passed over by a registered skip directive.
    Skipped,
    /// Passed over because the markup says `skipme`.
    SkippedByMarkup,
    /// Covered by the commit checked out when fast-forwarding.
    FastForwarded,
}

/// Positions the engine has replayed or deliberately passed over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    entries: BTreeMap<usize, Disposition>,
}

impl ProcessedSet {
    fn mark(&mut self, position: usize, disposition: Disposition) {
        self.entries.insert(position, disposition);
    }

    pub fn contains(&self, position: usize) -> bool {
        self.entries.contains_key(&position)
    }

    pub fn get(&self, position: usize) -> Option<Disposition> {
        self.entries.get(&position).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Disposition)> + '_ {
        self.entries.iter().map(|(position, disposition)| (*position, *disposition))
    }

    /// Lowest position below `len` that is not in the set.
    pub fn first_gap(&self, len: usize) -> Option<usize> {
        (0..len).find(|position| !self.entries.contains_key(position))
    }
}

/// Exempts one listing from replay, provided its text still contains `contains`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipDirective {
    pub position: usize,
    pub contains: String,
}

/// Resume replay at `position` from the commit labelled `commit_label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPosition {
    pub position: usize,
    pub commit_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    pub start: Option<StartPosition>,
}

#[derive(Debug, Clone)]
pub struct ReplayState {
    cursor: usize,
    phase: ReplayPhase,
    processed: ProcessedSet,
    last_output: Option<CommandOutput>,
    fast_forwarded_to: Option<usize>,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            cursor: 0,
            phase: ReplayPhase::Ready,
            processed: ProcessedSet::default(),
            last_output: None,
            fast_forwarded_to: None,
        }
    }
}

impl ReplayState {
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == ReplayPhase::Done
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Output of the most recent command, if any ran.
    pub fn last_output(&self) -> Option<&CommandOutput> {
        self.last_output.as_ref()
    }

    pub fn fast_forwarded_to(&self) -> Option<usize> {
        self.fast_forwarded_to
    }
}

/// Check directives against the listings without replaying anything.
///
/// Catches positions out of range, empty substrings, duplicate positions, and
/// substrings the listing text no longer contains.
pub fn check_skip_directives(
    listings: &ListingSequence,
    skips: &[SkipDirective],
) -> Result<(), ReplayError> {
    let mut seen = BTreeSet::new();
    for skip in skips {
        validate_skip(listings, skip.position, &skip.contains)?;
        if !seen.insert(skip.position) {
            return Err(ReplayError::InvalidDirective {
                position: skip.position,
                reason: "duplicate skip directive".to_string(),
            });
        }
        let listing = &listings[skip.position];
        if !listing.content().contains(skip.contains.as_str()) {
            return Err(ReplayError::ContractMismatch {
                context: ListingContext::new(skip.position, listing),
                expected: skip.contains.clone(),
            });
        }
    }
    Ok(())
}

fn validate_skip(
    listings: &ListingSequence,
    position: usize,
    contains: &str,
) -> Result<(), ReplayError> {
    if position >= listings.len() {
        return Err(ReplayError::InvalidDirective {
            position,
            reason: format!("chapter has {} listings", listings.len()),
        });
    }
    if contains.is_empty() {
        return Err(ReplayError::InvalidDirective {
            position,
            reason: "expected substring is empty".to_string(),
        });
    }
    Ok(())
}

pub struct ReplayEngine<'a, S: Sandbox> {
    listings: &'a ListingSequence,
    sandbox: &'a mut S,
    matcher: OutputMatcher,
    skips: BTreeMap<usize, SkipDirective>,
    state: ReplayState,
}

impl<'a, S: Sandbox> ReplayEngine<'a, S> {
    pub fn new(listings: &'a ListingSequence, sandbox: &'a mut S, matcher: OutputMatcher) -> Self {
        Self {
            listings,
            sandbox,
            matcher,
            skips: BTreeMap::new(),
            state: ReplayState::default(),
        }
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    pub fn into_state(self) -> ReplayState {
        self.state
    }

    /// Register a skip directive for a position not yet reached.
    ///
    /// The substring is only checked against the listing when the cursor gets
    /// there, so a directive that stopped matching fails at its own position.
    pub fn skip_with_check(
        &mut self,
        position: usize,
        contains: impl Into<String>,
    ) -> Result<(), ReplayError> {
        let contains = contains.into();
        validate_skip(self.listings, position, &contains)?;
        if self.state.processed.contains(position) || position < self.state.cursor {
            return Err(ReplayError::InvalidDirective {
                position,
                reason: "listing was already processed".to_string(),
            });
        }
        if self.skips.contains_key(&position) {
            return Err(ReplayError::InvalidDirective {
                position,
                reason: "duplicate skip directive".to_string(),
            });
        }
        tracing::debug!(position, contains = %contains, "registered skip directive");
        self.skips.insert(position, SkipDirective { position, contains });
        Ok(())
    }

    /// Jump to `start.position` by checking out the commit for `start.commit_label`.
    ///
    /// Every earlier position counts as processed; the commit stands in for
    /// their cumulative effect on the tree.
    pub fn fast_forward(&mut self, start: &StartPosition) -> Result<(), ReplayError> {
        if self.state.phase != ReplayPhase::Ready {
            return Err(ReplayError::InvalidStart {
                position: start.position,
                reason: "replay has already started".to_string(),
            });
        }
        if start.position > self.listings.len() {
            return Err(ReplayError::InvalidStart {
                position: start.position,
                reason: format!("chapter has {} listings", self.listings.len()),
            });
        }

        let spec = self
            .sandbox
            .resolve_commit_spec(&start.commit_label)
            .map_err(|err| ReplayError::setup("fast-forward resolve", &err))?;
        self.sandbox
            .checkout(&spec)
            .map_err(|err| ReplayError::setup("fast-forward checkout", &err))?;

        for position in 0..start.position {
            self.state.processed.mark(position, Disposition::FastForwarded);
        }
        // Directives for listings the commit already covers are moot.
        self.skips.retain(|position, _| *position >= start.position);
        self.state.cursor = start.position;
        self.state.fast_forwarded_to = Some(start.position);
        self.state.phase = if start.position == self.listings.len() {
            ReplayPhase::Done
        } else {
            ReplayPhase::Running
        };
        tracing::info!(position = start.position, commit = %spec, "fast-forwarded");
        Ok(())
    }

    /// Replay the listing under the cursor, or the cursor listing and its
    /// `dofirst` successor in swapped order.
    pub fn step(&mut self) -> Result<(), ReplayError> {
        match self.state.phase {
            ReplayPhase::Done => return Ok(()),
            ReplayPhase::Ready => self.state.phase = ReplayPhase::Running,
            ReplayPhase::Running => {}
        }

        let position = self.state.cursor;
        if position >= self.listings.len() {
            self.state.phase = ReplayPhase::Done;
            return Ok(());
        }

        let next = position + 1;
        let swap = self
            .listings
            .get(next)
            .is_some_and(|listing| listing.annotations().dofirst)
            && !self.skips.contains_key(&next);
        if swap {
            tracing::debug!(position, next, "replaying dofirst listing early");
            self.process(next)?;
            self.process(position)?;
            self.state.cursor = next + 1;
        } else {
            self.process(position)?;
            self.state.cursor = next;
        }

        if self.state.cursor >= self.listings.len() {
            self.state.phase = ReplayPhase::Done;
        }
        Ok(())
    }

    /// Fast-forward if asked, then step until done or the first failure.
    pub fn run(&mut self, options: &ReplayOptions) -> Result<(), ReplayError> {
        if let Some(start) = &options.start {
            self.fast_forward(start)?;
        }
        while !self.state.is_done() {
            self.step()?;
        }
        tracing::info!(
            listings = self.listings.len(),
            processed = self.state.processed.len(),
            "replay finished"
        );
        Ok(())
    }

    fn process(&mut self, position: usize) -> Result<(), ReplayError> {
        let listings = self.listings;
        let listing: &Listing = &listings[position];

        if let Some(skip) = self.skips.remove(&position) {
            if !listing.content().contains(skip.contains.as_str()) {
                return Err(ReplayError::ContractMismatch {
                    context: ListingContext::new(position, listing),
                    expected: skip.contains,
                });
            }
            tracing::info!(position, kind = listing.kind().tag(), "skipped by directive");
            self.state.processed.mark(position, Disposition::Skipped);
            return Ok(());
        }

        if listing.annotations().skipme {
            tracing::info!(position, kind = listing.kind().tag(), "skipped by markup");
            self.state.processed.mark(position, Disposition::SkippedByMarkup);
            return Ok(());
        }

        tracing::info!(position, kind = listing.kind().tag(), "replaying listing");
        if let Some(disposition) = self.dispatch(position, listing)? {
            self.state.processed.mark(position, disposition);
        }
        Ok(())
    }
}
