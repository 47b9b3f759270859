//! Per-kind handling of a single listing.
use super::code;
use super::{Disposition, ReplayEngine};
use crate::error::{ListingContext, ReplayError};
use crate::listing::{CheckoutTiming, Listing, ListingKind};
use crate::sandbox::{CommitSpec, Sandbox};
use crate::util::truncate_string;
use similar::TextDiff;

const STDERR_MAX_BYTES: usize = 4096;
const PATCH_LANGUAGES: &[&str] = &["diff", "patch"];

impl<S: Sandbox> ReplayEngine<'_, S> {
    /// Carry out one listing. `None` means the listing is not counted as
    /// processed and needs a skip directive to be covered.
    pub(super) fn dispatch(
        &mut self,
        position: usize,
        listing: &Listing,
    ) -> Result<Option<Disposition>, ReplayError> {
        match listing.kind() {
            ListingKind::Command => self.run_listing_command(position, listing, false)?,
            // Test runners fail on purpose all the time in a TDD book.
            ListingKind::ToolCommand { .. } => self.run_listing_command(position, listing, true)?,
            ListingKind::GitRefCommand {
                commit_ref,
                checkout,
            } => {
                let spec = self.resolve(position, listing, commit_ref)?;
                if *checkout == CheckoutTiming::Before {
                    self.checkout(position, listing, &spec)?;
                }
                self.run_listing_command(position, listing, false)?;
                if *checkout == CheckoutTiming::After {
                    self.checkout(position, listing, &spec)?;
                }
            }
            ListingKind::CodeListing { filename } => {
                self.apply_code_listing(position, listing, filename)?
            }
            ListingKind::CodeListingWithGitRef {
                filename,
                commit_ref,
            } => {
                if !listing.annotations().current_contents {
                    let spec = self.resolve(position, listing, commit_ref)?;
                    self.sandbox
                        .restore_file(&spec, filename)
                        .map_err(|err| ReplayError::sandbox(context(position, listing), &err))?;
                }
                self.assert_code_present(position, listing, filename)?;
            }
            ListingKind::Output => self.check_output(position, listing)?,
            ListingKind::Comment => {
                tracing::warn!(position, "comment listing has no skip directive");
                return Ok(None);
            }
            ListingKind::Other => {}
        }
        Ok(Some(Disposition::Replayed))
    }

    fn resolve(
        &mut self,
        position: usize,
        listing: &Listing,
        label: &str,
    ) -> Result<CommitSpec, ReplayError> {
        self.sandbox
            .resolve_commit_spec(label)
            .map_err(|err| ReplayError::sandbox(context(position, listing), &err))
    }

    fn checkout(
        &mut self,
        position: usize,
        listing: &Listing,
        spec: &CommitSpec,
    ) -> Result<(), ReplayError> {
        tracing::debug!(position, commit = %spec, "checking out");
        self.sandbox
            .checkout(spec)
            .map_err(|err| ReplayError::sandbox(context(position, listing), &err))
    }

    fn run_listing_command(
        &mut self,
        position: usize,
        listing: &Listing,
        tolerate_failure: bool,
    ) -> Result<(), ReplayError> {
        let output = self
            .sandbox
            .run_command(listing.content())
            .map_err(|err| ReplayError::sandbox(context(position, listing), &err))?;

        if !output.success() {
            if tolerate_failure || listing.annotations().ignore_errors {
                tracing::debug!(position, exit_code = ?output.exit_code, "tolerated failure");
            } else {
                return Err(ReplayError::SandboxExecution {
                    context: context(position, listing),
                    exit_code: output.exit_code,
                    message: "command exited unsuccessfully".to_string(),
                    stderr: truncate_string(&output.stderr, STDERR_MAX_BYTES),
                });
            }
        }

        if let Some(expected) = &listing.annotations().expect {
            if let Some(diff) = self.matcher.compare(expected, &output.combined()) {
                return Err(ReplayError::OutputMismatch {
                    context: context(position, listing),
                    diff,
                });
            }
        }
        self.state.last_output = Some(output);
        Ok(())
    }

    fn check_output(&self, position: usize, listing: &Listing) -> Result<(), ReplayError> {
        let Some(actual) = &self.state.last_output else {
            return Err(ReplayError::OutputMismatch {
                context: context(position, listing),
                diff: "no command has run before this output".to_string(),
            });
        };
        match self.matcher.compare(listing.content(), &actual.combined()) {
            Some(diff) => Err(ReplayError::OutputMismatch {
                context: context(position, listing),
                diff,
            }),
            None => Ok(()),
        }
    }

    fn apply_code_listing(
        &mut self,
        position: usize,
        listing: &Listing,
        filename: &str,
    ) -> Result<(), ReplayError> {
        if listing.annotations().current_contents {
            return self.assert_code_present(position, listing, filename);
        }

        let is_patch = listing
            .annotations()
            .language
            .as_deref()
            .is_some_and(|language| PATCH_LANGUAGES.contains(&language));
        let result = if is_patch {
            self.sandbox.apply_patch(listing.content())
        } else if code::is_elided(listing.content()) {
            return Err(ReplayError::SandboxExecution {
                context: context(position, listing),
                exit_code: None,
                message: format!("elided listing for {filename} has no commit ref to restore from"),
                stderr: String::new(),
            });
        } else {
            self.sandbox.write_file(filename, listing.content())
        };
        result.map_err(|err| ReplayError::sandbox(context(position, listing), &err))
    }

    /// Every chunk of the listing must appear in the file, in order.
    fn assert_code_present(
        &mut self,
        position: usize,
        listing: &Listing,
        filename: &str,
    ) -> Result<(), ReplayError> {
        let contents = self
            .sandbox
            .read_file(filename)
            .map_err(|err| ReplayError::sandbox(context(position, listing), &err))?;
        let chunks = code::split_chunks(listing.content());
        if code::contains_chunks_in_order(&contents, &chunks) {
            return Ok(());
        }
        let diff = TextDiff::from_lines(listing.content(), contents.as_str())
            .unified_diff()
            .context_radius(3)
            .header("listing", filename)
            .to_string();
        Err(ReplayError::CodeMismatch {
            context: context(position, listing),
            filename: filename.to_string(),
            diff,
        })
    }
}

fn context(position: usize, listing: &Listing) -> ListingContext {
    ListingContext::new(position, listing)
}
