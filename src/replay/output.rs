//! Comparison of captured terminal output against the book.
//!
//! Both sides are normalized first: ANSI escapes stripped, configured and
//! built-in rewrites applied, trailing whitespace trimmed, blank lines
//! dropped. Each expected line must then be contained in some actual line,
//! in order. A `[...]` or `...` line in the expectation documents an
//! abbreviation and is not itself matched.
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;

const ANSI_ESCAPE: &str = r"\x1b\[[0-9;?]*[A-Za-z]";

/// Volatile fragments that differ between any two runs of the same command.
const DEFAULT_NORMALIZERS: &[(&str, &str)] = &[
    (r"\b\d+(?:\.\d+)?s\b", "X.XXs"),
    (r"\b0x[0-9a-fA-F]{4,}\b", "0xADDR"),
];

/// A configured rewrite applied to every output line before comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerSpec {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone)]
struct Normalizer {
    pattern: Regex,
    replacement: String,
}

#[derive(Debug, Clone)]
pub struct OutputMatcher {
    ansi: Regex,
    normalizers: Vec<Normalizer>,
}

impl OutputMatcher {
    /// Built-in normalizers followed by `extra`, in order.
    pub fn new(extra: &[NormalizerSpec]) -> Result<Self> {
        let ansi = Regex::new(ANSI_ESCAPE).context("compile ANSI escape pattern")?;
        let mut normalizers = Vec::with_capacity(DEFAULT_NORMALIZERS.len() + extra.len());
        for (pattern, replacement) in DEFAULT_NORMALIZERS {
            normalizers.push(Normalizer {
                pattern: Regex::new(pattern)
                    .with_context(|| format!("compile built-in normalizer {pattern:?}"))?,
                replacement: (*replacement).to_string(),
            });
        }
        for spec in extra {
            normalizers.push(Normalizer {
                pattern: Regex::new(&spec.pattern)
                    .with_context(|| format!("compile output normalizer {:?}", spec.pattern))?,
                replacement: spec.replacement.clone(),
            });
        }
        Ok(Self { ansi, normalizers })
    }

    pub fn normalize(&self, text: &str) -> Vec<String> {
        let plain = self.ansi.replace_all(text, "");
        plain
            .lines()
            .map(|line| {
                let mut line = line.to_string();
                for normalizer in &self.normalizers {
                    line = normalizer
                        .pattern
                        .replace_all(&line, normalizer.replacement.as_str())
                        .into_owned();
                }
                line.trim_end().to_string()
            })
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// `None` when `actual` satisfies `expected`, otherwise a unified diff of
    /// the normalized texts.
    pub fn compare(&self, expected: &str, actual: &str) -> Option<String> {
        let expected = self.normalize(expected);
        let actual = self.normalize(actual);
        let wanted: Vec<&str> = expected
            .iter()
            .map(String::as_str)
            .filter(|line| !is_output_elision(line))
            .collect();

        let mut remaining = actual.iter();
        let matched = wanted
            .iter()
            .all(|line| remaining.any(|candidate| candidate.contains(line)));
        if matched {
            return None;
        }

        let expected_text = join_lines(&expected);
        let actual_text = join_lines(&actual);
        Some(
            TextDiff::from_lines(&expected_text, &actual_text)
                .unified_diff()
                .context_radius(3)
                .header("expected", "actual")
                .to_string(),
        )
    }
}

fn is_output_elision(line: &str) -> bool {
    matches!(line.trim(), "[...]" | "...") || super::code::is_elision(line)
}

fn join_lines(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}
