//! Assigns every raw block exactly one listing kind.
//!
//! Classification only looks at structural markers: the fence language, a
//! leading shell prompt, filename/ref/tool attributes, roles, and configured
//! tool prefixes matched token by token. The most specific marker wins.
use crate::blocks::{
    RawBlock, CONSOLE_LANGUAGES, ROLE_CHECKOUT_AFTER, ROLE_COMMENT, ROLE_CURRENT_CONTENTS,
    ROLE_DOFIRST, ROLE_IGNORE_ERRORS, ROLE_OUTPUT, ROLE_SKIPME,
};
use crate::error::ReplayError;
use crate::listing::{Annotations, CheckoutTiming, Listing, ListingKind, ListingSequence};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const OUTPUT_LANGUAGES: &[&str] = &["output"];
const COMMENT_LANGUAGES: &[&str] = &["comment"];

/// A tool whose invocations get the tool-command tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
struct ToolPattern {
    name: String,
    argv: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    tools: Vec<ToolPattern>,
}

impl Classifier {
    pub fn new(tools: &[ToolSpec]) -> Result<Self> {
        let mut patterns = Vec::new();
        for tool in tools {
            if tool.prefixes.is_empty() {
                return Err(anyhow!("tool {:?} has no command prefixes", tool.name));
            }
            for prefix in &tool.prefixes {
                let argv = shell_words::split(prefix)
                    .with_context(|| format!("parse prefix {prefix:?} for tool {}", tool.name))?;
                if argv.is_empty() {
                    return Err(anyhow!("tool {:?} has an empty command prefix", tool.name));
                }
                patterns.push(ToolPattern {
                    name: tool.name.clone(),
                    argv,
                });
            }
        }
        Ok(Self { tools: patterns })
    }

    /// Classify blocks in order. The first malformed block aborts the chapter.
    pub fn classify(&self, blocks: &[RawBlock]) -> Result<ListingSequence, ReplayError> {
        blocks
            .iter()
            .map(|block| self.classify_block(block))
            .collect::<Result<Vec<_>, _>>()
            .map(ListingSequence::new)
    }

    pub fn classify_block(&self, block: &RawBlock) -> Result<Listing, ReplayError> {
        let line = block.line_or_zero();
        let annotations = Annotations {
            dofirst: block.has_role(ROLE_DOFIRST),
            ignore_errors: block.has_role(ROLE_IGNORE_ERRORS),
            current_contents: block.has_role(ROLE_CURRENT_CONTENTS),
            skipme: block.has_role(ROLE_SKIPME),
            expect: block.expect.clone(),
            language: block.language.clone(),
            line: block.line,
        };
        let language = block.language.as_deref().unwrap_or_default();

        if block.has_role(ROLE_OUTPUT) {
            if let Some(filename) = &block.filename {
                return Err(ReplayError::ClassificationAmbiguity {
                    line,
                    message: format!("output block also names file {filename:?}"),
                });
            }
            if block.commit_ref.is_some() || block.tool.is_some() {
                return Err(ReplayError::ClassificationAmbiguity {
                    line,
                    message: "output block carries command markers".to_string(),
                });
            }
            return Ok(Listing::new(ListingKind::Output, &block.text, annotations));
        }

        if block.has_role(ROLE_COMMENT) || COMMENT_LANGUAGES.contains(&language) {
            return Ok(Listing::new(ListingKind::Comment, &block.text, annotations));
        }

        if let Some(filename) = &block.filename {
            let kind = match &block.commit_ref {
                Some(commit_ref) => ListingKind::CodeListingWithGitRef {
                    filename: filename.clone(),
                    commit_ref: commit_ref.clone(),
                },
                None => ListingKind::CodeListing {
                    filename: filename.clone(),
                },
            };
            return Ok(Listing::new(kind, &block.text, annotations));
        }

        if let Some(command) = command_text(block) {
            return self.classify_command(block, command, annotations);
        }

        if OUTPUT_LANGUAGES.contains(&language) {
            return Ok(Listing::new(ListingKind::Output, &block.text, annotations));
        }
        Ok(Listing::new(ListingKind::Other, &block.text, annotations))
    }

    fn classify_command(
        &self,
        block: &RawBlock,
        command: &str,
        annotations: Annotations,
    ) -> Result<Listing, ReplayError> {
        let line = block.line_or_zero();
        let command = command.trim();
        if command.is_empty() {
            return Err(ReplayError::Parse {
                line,
                message: "empty shell command".to_string(),
            });
        }
        if command.starts_with('#') {
            return Ok(Listing::new(ListingKind::Comment, command, annotations));
        }
        let argv = shell_words::split(command).map_err(|err| ReplayError::Parse {
            line,
            message: format!("malformed shell command {command:?}: {err}"),
        })?;

        let kind = if let Some(commit_ref) = &block.commit_ref {
            let checkout = if block.has_role(ROLE_CHECKOUT_AFTER) {
                CheckoutTiming::After
            } else {
                CheckoutTiming::Before
            };
            ListingKind::GitRefCommand {
                commit_ref: commit_ref.clone(),
                checkout,
            }
        } else if let Some(tool) = &block.tool {
            ListingKind::ToolCommand { tool: tool.clone() }
        } else if let Some(tool) = self.match_tool(&argv) {
            ListingKind::ToolCommand {
                tool: tool.to_string(),
            }
        } else {
            ListingKind::Command
        };
        Ok(Listing::new(kind, command, annotations))
    }

    fn match_tool(&self, argv: &[String]) -> Option<&str> {
        let argv = strip_env_assignments(argv);
        self.tools
            .iter()
            .find(|pattern| argv.starts_with(&pattern.argv))
            .map(|pattern| pattern.name.as_str())
    }
}

/// Command text with the prompt removed, when the block is a shell command.
fn command_text(block: &RawBlock) -> Option<&str> {
    let text = block.text.trim_start();
    let prompted = text
        .strip_prefix("$ ")
        .or_else(|| (text.trim_end() == "$").then_some(""));
    let is_console = block
        .language
        .as_deref()
        .is_some_and(|lang| CONSOLE_LANGUAGES.contains(&lang));
    match prompted {
        Some(command) => Some(command),
        None if is_console => Some(text),
        None => None,
    }
}

fn strip_env_assignments(argv: &[String]) -> &[String] {
    let skip = argv
        .iter()
        .take_while(|token| is_env_assignment(token))
        .count();
    &argv[skip..]
}

fn is_env_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
