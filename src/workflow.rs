//! Chapter-level orchestration: load, replay, verify, report.
//!
//! [`replay_chapter`] is generic over the sandbox so the whole pipeline runs
//! against [`crate::sandbox::mock::MockSandbox`] in tests; the `run_*`
//! functions are the CLI entry points and always use a git sandbox.
use crate::blocks::{parse_block_json, parse_chapter_text, RawBlock};
use crate::classify::Classifier;
use crate::cli::{ListingsArgs, RunArgs, ValidateArgs};
use crate::config::{load_config, ChapterConfig, LoadedConfig};
use crate::error::ReplayError;
use crate::listing::{Listing, ListingSequence};
use crate::replay::{
    check_skip_directives, OutputMatcher, ReplayEngine, ReplayOptions, ReplayState,
    SkipDirective, StartPosition,
};
use crate::report::{write_report, ReplayReport};
use crate::sandbox::git::{GitSandbox, GitSandboxOptions};
use crate::sandbox::Sandbox;
use crate::util::display_path;
use crate::verify::{self, IgnoreSet};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Everything replay needs from a config, compiled.
#[derive(Debug, Clone)]
pub struct ChapterSettings {
    pub skips: Vec<SkipDirective>,
    pub ignore: IgnoreSet,
    pub matcher: OutputMatcher,
    pub previous_chapter: Option<String>,
    pub final_commit_message: String,
}

impl ChapterSettings {
    pub fn from_config(config: &ChapterConfig) -> Result<Self> {
        Ok(Self {
            skips: config.skips.clone(),
            ignore: config.ignore_set()?,
            matcher: config.output_matcher()?,
            previous_chapter: config.previous_chapter.clone(),
            final_commit_message: config.final_commit_message().to_string(),
        })
    }
}

/// Result of a chapter run, kept even on failure so it can be reported.
#[derive(Debug)]
pub struct ChapterOutcome {
    pub state: ReplayState,
    pub error: Option<ReplayError>,
    pub final_diff_clean: bool,
}

impl ChapterOutcome {
    fn failed(state: ReplayState, error: ReplayError) -> Self {
        Self {
            state,
            error: Some(error),
            final_diff_clean: false,
        }
    }

    pub fn into_result(self) -> Result<ReplayState, ReplayError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.state),
        }
    }
}

/// Replay `listings` into `sandbox`, then check coverage and the final diff.
///
/// Stops at the first failure. Coverage is only checked after a complete
/// run, and the final commit is made only once coverage holds.
pub fn replay_chapter<S: Sandbox>(
    listings: &ListingSequence,
    sandbox: &mut S,
    settings: &ChapterSettings,
    options: &ReplayOptions,
) -> ChapterOutcome {
    if let Err(error) = checkout_chapter_start(sandbox, settings.previous_chapter.as_deref()) {
        return ChapterOutcome::failed(ReplayState::default(), error);
    }

    let mut engine = ReplayEngine::new(listings, sandbox, settings.matcher.clone());
    let run = register_skips(&mut engine, &settings.skips).and_then(|()| engine.run(options));
    let state = engine.into_state();
    if let Err(error) = run {
        return ChapterOutcome::failed(state, error);
    }

    if let Err(error) = verify::assert_all_listings_checked(listings, &state) {
        return ChapterOutcome::failed(state, error);
    }
    if let Err(err) = sandbox.commit(&settings.final_commit_message) {
        return ChapterOutcome::failed(state, ReplayError::setup("final commit", &err));
    }
    match verify::check_final_diff(sandbox, &settings.ignore) {
        Ok(()) => ChapterOutcome {
            state,
            error: None,
            final_diff_clean: true,
        },
        Err(error) => ChapterOutcome::failed(state, error),
    }
}

fn checkout_chapter_start<S: Sandbox>(
    sandbox: &mut S,
    previous_chapter: Option<&str>,
) -> Result<(), ReplayError> {
    let Some(label) = previous_chapter else {
        return Ok(());
    };
    let spec = sandbox
        .resolve_commit_spec(label)
        .map_err(|err| ReplayError::setup("resolve chapter start", &err))?;
    sandbox
        .checkout(&spec)
        .map_err(|err| ReplayError::setup("checkout chapter start", &err))?;
    tracing::info!(commit = %spec, "checked out chapter start");
    Ok(())
}

fn register_skips<S: Sandbox>(
    engine: &mut ReplayEngine<'_, S>,
    skips: &[SkipDirective],
) -> Result<(), ReplayError> {
    for skip in skips {
        engine.skip_with_check(skip.position, skip.contains.as_str())?;
    }
    Ok(())
}

/// Read the chapter source named by the config and classify it.
pub fn load_listings(loaded: &LoadedConfig) -> Result<ListingSequence> {
    let path = loaded.listings_path();
    let text =
        fs::read_to_string(&path).with_context(|| format!("read listings {}", path.display()))?;
    let blocks = parse_blocks(&path, &text)
        .with_context(|| format!("parse listings {}", path.display()))?;
    let classifier = Classifier::new(&loaded.config.tools)?;
    let listings = classifier
        .classify(&blocks)
        .with_context(|| format!("classify listings {}", path.display()))?;
    tracing::debug!(
        blocks = blocks.len(),
        listings = listings.len(),
        "loaded chapter listings"
    );
    Ok(listings)
}

fn parse_blocks(path: &Path, text: &str) -> Result<Vec<RawBlock>, ReplayError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_block_json(text),
        _ => parse_chapter_text(text),
    }
}

pub fn run_replay(args: &RunArgs) -> Result<()> {
    let loaded = load_config(&args.config)?;
    let listings = load_listings(&loaded)?;
    let settings = ChapterSettings::from_config(&loaded.config)?;
    let options = ReplayOptions {
        start: match (args.start_at, args.start_ref.as_ref()) {
            (Some(position), Some(label)) => Some(StartPosition {
                position,
                commit_label: label.clone(),
            }),
            (None, None) => None,
            _ => return Err(anyhow!("--start-at and --start-ref must be given together")),
        },
    };

    let mut sandbox = GitSandbox::provision(&GitSandboxOptions {
        repo: loaded.repo_location(),
        reference: loaded.config.reference(),
        dest: args.sandbox_dir.clone(),
        env: loaded.config.env.clone(),
    })?;

    let started = Instant::now();
    let outcome = replay_chapter(&listings, &mut sandbox, &settings, &options);
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis(),
        chapter = %loaded.config.chapter,
        ok = outcome.error.is_none(),
        "chapter replay complete"
    );

    if let Some(out) = &args.out {
        let report = ReplayReport::new(
            &loaded.config.chapter,
            &listings,
            &outcome.state,
            outcome.final_diff_clean,
        )?;
        write_report(out, &report)?;
        println!("wrote {}", shown(out));
    }
    if args.sandbox_dir.is_some() {
        println!("sandbox kept at {}", sandbox.root().display());
    }

    let state = outcome
        .into_result()
        .with_context(|| format!("replay chapter {}", loaded.config.chapter))?;
    println!(
        "{}: {} of {} listings accounted for, final diff clean",
        loaded.config.chapter,
        state.processed().len(),
        listings.len()
    );
    Ok(())
}

#[derive(Serialize)]
struct ListingEntry<'a> {
    position: usize,
    #[serde(flatten)]
    listing: &'a Listing,
}

pub fn run_listings(args: &ListingsArgs) -> Result<()> {
    let loaded = load_config(&args.config)?;
    let listings = load_listings(&loaded)?;
    if args.json {
        let entries: Vec<ListingEntry<'_>> = listings
            .iter()
            .enumerate()
            .map(|(position, listing)| ListingEntry { position, listing })
            .collect();
        let text = serde_json::to_string_pretty(&entries).context("serialize listings")?;
        println!("{text}");
        return Ok(());
    }
    for (position, listing) in listings.iter().enumerate() {
        println!(
            "{position:>4}  {:<26} {}",
            listing.kind().tag(),
            listing.snippet()
        );
    }
    Ok(())
}

pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    let loaded = load_config(&args.config)?;
    let listings = load_listings(&loaded)?;
    check_skip_directives(&listings, &loaded.config.skips)
        .with_context(|| format!("check skips in {}", shown(&args.config)))?;
    println!(
        "{}: {} listings, {} skip directives ok",
        loaded.config.chapter,
        listings.len(),
        loaded.config.skips.len()
    );
    Ok(())
}

/// Path relative to the working directory when it lies below it.
fn shown(path: &Path) -> String {
    let cwd = std::env::current_dir().ok();
    display_path(path, cwd.as_deref())
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
