//! Machine-readable record of one chapter run.
use crate::listing::ListingSequence;
use crate::replay::{Disposition, ReplayState};
use crate::util::now_epoch_ms;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub schema_version: u32,
    pub generated_at_epoch_ms: u128,
    pub chapter: String,
    pub listing_count: usize,
    pub processed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_forwarded_to: Option<usize>,
    pub listings: Vec<ListingRecord>,
    pub final_diff_clean: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingRecord {
    pub position: usize,
    pub kind: &'static str,
    /// `None` for listings the run never accounted for.
    pub disposition: Option<Disposition>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ReplayReport {
    pub fn new(
        chapter: &str,
        listings: &ListingSequence,
        state: &ReplayState,
        final_diff_clean: bool,
    ) -> Result<Self> {
        let records = listings
            .iter()
            .enumerate()
            .map(|(position, listing)| ListingRecord {
                position,
                kind: listing.kind().tag(),
                disposition: state.processed().get(position),
                snippet: listing.snippet(),
                line: listing.annotations().line,
            })
            .collect();
        Ok(Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at_epoch_ms: now_epoch_ms()?,
            chapter: chapter.to_string(),
            listing_count: listings.len(),
            processed_count: state.processed().len(),
            fast_forwarded_to: state.fast_forwarded_to(),
            listings: records,
            final_diff_clean,
        })
    }
}

/// Write the report next to its destination, then rename it into place.
pub fn write_report(path: &Path, report: &ReplayReport) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let bytes = serde_json::to_vec_pretty(report).context("serialize replay report")?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("stage report in {}", parent.display()))?;
    staged
        .write_all(&bytes)
        .context("write staged report")?;
    staged
        .persist(path)
        .map_err(|err| anyhow!("publish report {}: {}", path.display(), err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{Annotations, Listing, ListingKind};
    use crate::replay::{OutputMatcher, ReplayEngine, ReplayOptions};
    use crate::sandbox::mock::MockSandbox;

    #[test]
    fn report_lists_every_position() {
        let listings: ListingSequence = vec![
            Listing::new(ListingKind::Command, "ls", Annotations::default()),
            Listing::new(ListingKind::Comment, "# a note", Annotations::default()),
        ]
        .into_iter()
        .collect();
        let mut sandbox = MockSandbox::new();
        let matcher = OutputMatcher::new(&[]).expect("matcher");
        let mut engine = ReplayEngine::new(&listings, &mut sandbox, matcher);
        engine.run(&ReplayOptions::default()).expect("run");
        let state = engine.into_state();

        let report = ReplayReport::new("chapter_01", &listings, &state, false).expect("report");
        assert_eq!(report.listing_count, 2);
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.listings[0].disposition, Some(Disposition::Replayed));
        assert_eq!(report.listings[1].disposition, None);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reports").join("chapter_01.json");
        write_report(&path, &report).expect("write report");
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read report")).expect("json");
        assert_eq!(value["schema_version"], REPORT_SCHEMA_VERSION);
        assert_eq!(value["listings"][0]["disposition"], "replayed");
        assert_eq!(value["listings"][1]["kind"], "comment");
        assert!(value.get("fast_forwarded_to").is_none());
    }
}
