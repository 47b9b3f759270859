//! Post-replay assertions: coverage and final diff.
//!
//! Coverage is checked before the diff so a silently dropped listing is
//! reported as such rather than as a confusing tree difference.
use crate::error::{ListingContext, ReplayError};
use crate::listing::ListingSequence;
use crate::replay::ReplayState;
use crate::sandbox::Sandbox;
use anyhow::{Context, Result};
use regex::Regex;

const REGEX_PREFIX: &str = "re:";

#[derive(Debug, Clone)]
pub enum IgnorePattern {
    Substring(String),
    Regex(Regex),
}

impl IgnorePattern {
    /// `re:<regex>` compiles a regex; anything else is a plain substring.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => Ok(IgnorePattern::Regex(
                Regex::new(pattern).with_context(|| format!("compile ignore regex {pattern:?}"))?,
            )),
            None => Ok(IgnorePattern::Substring(raw.to_string())),
        }
    }

    fn matches(&self, line: &str) -> bool {
        match self {
            IgnorePattern::Substring(needle) => line.contains(needle.as_str()),
            IgnorePattern::Regex(re) => re.is_match(line),
        }
    }
}

/// Line patterns whose changes do not count as a difference.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreSet {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        let patterns = raw
            .iter()
            .map(|pattern| IgnorePattern::parse(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Blank changes are always noise.
    pub fn is_ignorable(&self, line: &str) -> bool {
        line.trim().is_empty() || self.patterns.iter().any(|pattern| pattern.matches(line))
    }
}

/// Every listing must be replayed, skipped, or fast-forwarded over.
pub fn assert_all_listings_checked(
    listings: &ListingSequence,
    state: &ReplayState,
) -> Result<(), ReplayError> {
    let gap = state
        .processed()
        .first_gap(listings.len())
        .or_else(|| (!state.is_done()).then_some(state.cursor()));
    match gap {
        Some(position) if position < listings.len() => Err(ReplayError::CoverageGap {
            context: ListingContext::new(position, &listings[position]),
        }),
        _ => Ok(()),
    }
}

/// Ask the sandbox for its diff against the reference and fail on any residue.
pub fn check_final_diff<S: Sandbox>(sandbox: &mut S, ignore: &IgnoreSet) -> Result<(), ReplayError> {
    let residual = sandbox
        .diff(ignore)
        .map_err(|err| ReplayError::setup("diff", &err))?;
    match residual {
        Some(hunk) => Err(ReplayError::FinalDiffMismatch { hunk }),
        None => Ok(()),
    }
}

/// Git header lines that record a change on their own, with or without hunks.
const STRUCTURAL_HEADERS: &[&str] = &[
    "new file mode",
    "deleted file mode",
    "old mode",
    "new mode",
    "rename from",
    "rename to",
    "copy from",
    "copy to",
    "Binary files",
];

/// Drop hunks whose changed lines are all ignorable.
///
/// Returns `None` when nothing significant remains; otherwise the surviving
/// hunks, each file's group preceded by its header. A file whose header
/// records a creation, deletion, mode change, rename or binary change always
/// survives.
pub fn strip_ignored(diff: &str, ignore: &IgnoreSet) -> Option<String> {
    let mut residual = Residual::default();
    for line in diff.lines() {
        if line.starts_with("diff ") {
            residual.start_file(line);
        } else if line.starts_with("@@") {
            residual.start_hunk(line);
        } else if residual.hunk.is_empty() {
            // index, ---/+++ and mode lines belong to the file header.
            if STRUCTURAL_HEADERS.iter().any(|prefix| line.starts_with(prefix)) {
                residual.structural = true;
            }
            residual.file_header.push(line);
        } else {
            if let Some(body) = line.strip_prefix('+').or_else(|| line.strip_prefix('-')) {
                if !ignore.is_ignorable(body) {
                    residual.significant = true;
                }
            }
            residual.hunk.push(line);
        }
    }
    residual.finish_file();

    if residual.out.is_empty() {
        None
    } else {
        Some(residual.out)
    }
}

#[derive(Default)]
struct Residual<'a> {
    out: String,
    file_header: Vec<&'a str>,
    header_emitted: bool,
    hunk: Vec<&'a str>,
    significant: bool,
    structural: bool,
}

impl<'a> Residual<'a> {
    fn start_file(&mut self, line: &'a str) {
        self.finish_file();
        self.file_header.clear();
        self.file_header.push(line);
        self.header_emitted = false;
        self.structural = false;
    }

    fn start_hunk(&mut self, line: &'a str) {
        self.flush_hunk();
        if self.structural {
            self.emit_header();
        }
        self.hunk.push(line);
    }

    fn finish_file(&mut self) {
        self.flush_hunk();
        if self.structural {
            self.emit_header();
        }
    }

    fn emit_header(&mut self) {
        if self.header_emitted {
            return;
        }
        for line in &self.file_header {
            self.out.push_str(line);
            self.out.push('\n');
        }
        self.header_emitted = true;
    }

    fn flush_hunk(&mut self) {
        if self.significant {
            self.emit_header();
            for line in &self.hunk {
                self.out.push_str(line);
                self.out.push('\n');
            }
        }
        self.hunk.clear();
        self.significant = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const MIGRATION_DIFF: &str = indoc! {"
        diff --git a/lists/migrations/0001_initial.py b/lists/migrations/0001_initial.py
        index 1111111..2222222 100644
        --- a/lists/migrations/0001_initial.py
        +++ b/lists/migrations/0001_initial.py
        @@ -1,4 +1,4 @@
        -# Generated by Django 4.2.1 on 2023-05-01 10:00
        +# Generated by Django 4.2.7 on 2024-01-09 12:34

         from django.db import migrations, models
    "};

    #[test]
    fn ignored_banner_only_diff_is_clean() {
        let ignore = IgnoreSet::parse(&["Generated by Django 4.2"]).expect("patterns");
        assert_eq!(strip_ignored(MIGRATION_DIFF, &ignore), None);
    }

    #[test]
    fn other_changes_survive_with_their_file_header() {
        let diff = format!(
            "{MIGRATION_DIFF}{}",
            indoc! {"
                diff --git a/lists/views.py b/lists/views.py
                --- a/lists/views.py
                +++ b/lists/views.py
                @@ -3,3 +3,3 @@ def home_page(request):
                -    return render(request, \"home.html\")
                +    return render(request, \"index.html\")
            "}
        );
        let ignore = IgnoreSet::parse(&["Generated by Django 4.2"]).expect("patterns");
        let residual = strip_ignored(&diff, &ignore).expect("residual diff");
        assert!(residual.starts_with("diff --git a/lists/views.py"), "{residual}");
        assert!(residual.contains("+++ b/lists/views.py"));
        assert!(residual.contains("index.html"));
        assert!(!residual.contains("Generated by Django"));
    }

    #[test]
    fn regex_patterns_and_blank_changes() {
        let diff = indoc! {"
            diff --git a/setup.cfg b/setup.cfg
            --- a/setup.cfg
            +++ b/setup.cfg
            @@ -1,2 +1,3 @@
             [metadata]
            -version = 1.0.3
            +version = 1.0.4
            +
        "};
        let ignore = IgnoreSet::parse(&[r"re:^version = \d+\.\d+\.\d+$"]).expect("patterns");
        assert_eq!(strip_ignored(diff, &ignore), None);
        assert!(strip_ignored(diff, &IgnoreSet::default()).is_some());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(IgnoreSet::parse(&["re:(unclosed"]).is_err());
    }

    #[test]
    fn hunkless_file_changes_are_significant() {
        let cases = [
            indoc! {"
                diff --git a/lists/__init__.py b/lists/__init__.py
                new file mode 100644
                index 0000000..e69de29
            "},
            indoc! {"
                diff --git a/db.sqlite3 b/db.sqlite3
                index 1111111..2222222 100644
                Binary files a/db.sqlite3 and b/db.sqlite3 differ
            "},
            indoc! {"
                diff --git a/manage.py b/manage.py
                old mode 100644
                new mode 100755
            "},
            indoc! {"
                diff --git a/lists/tests.py b/lists/tests.py
                deleted file mode 100644
                index e69de29..0000000
            "},
            indoc! {"
                diff --git a/lists/test.py b/lists/tests.py
                similarity index 100%
                rename from lists/test.py
                rename to lists/tests.py
            "},
        ];
        let ignore = IgnoreSet::parse(&["Generated by Django 4.2"]).expect("patterns");
        for diff in cases {
            let residual = strip_ignored(diff, &ignore).expect("file change survives");
            assert_eq!(residual, diff);
        }
    }

    #[test]
    fn mode_change_keeps_header_when_hunks_are_ignored() {
        let diff = indoc! {"
            diff --git a/manage.py b/manage.py
            old mode 100644
            new mode 100755
            --- a/manage.py
            +++ b/manage.py
            @@ -1,1 +1,1 @@
            -# Generated by Django 4.2.1
            +# Generated by Django 4.2.7
        "};
        let ignore = IgnoreSet::parse(&["Generated by Django 4.2"]).expect("patterns");
        let residual = strip_ignored(diff, &ignore).expect("mode change survives");
        assert!(residual.contains("new mode 100755"), "{residual}");
        assert!(!residual.contains("Generated by Django"), "{residual}");
    }

    #[test]
    fn empty_diff_is_clean() {
        assert_eq!(strip_ignored("", &IgnoreSet::default()), None);
    }
}
