//! Raw chapter blocks, the hand-off point from book markup to the classifier.
//!
//! Blocks arrive either as a JSON array produced by an external book parser or
//! from a minimal fenced-chapter text format. Only block-level hints are read
//! here; deciding what a block *is* belongs to [`crate::classify`].
use crate::error::ReplayError;
use serde::{Deserialize, Serialize};

const MAX_FENCE_PREFIX_WS: usize = 3;

pub const CONSOLE_LANGUAGES: &[&str] = &["console", "shell", "sh", "bash", "zsh"];

/// Bare info-string tokens understood as block roles.
pub const KNOWN_ROLES: &[&str] = &[
    ROLE_DOFIRST,
    ROLE_IGNORE_ERRORS,
    ROLE_CURRENT_CONTENTS,
    ROLE_SKIPME,
    ROLE_COMMENT,
    ROLE_OUTPUT,
    ROLE_CHECKOUT_AFTER,
];

pub const ROLE_DOFIRST: &str = "dofirst";
pub const ROLE_IGNORE_ERRORS: &str = "ignore-errors";
pub const ROLE_CURRENT_CONTENTS: &str = "currentcontents";
pub const ROLE_SKIPME: &str = "skipme";
pub const ROLE_COMMENT: &str = "comment";
pub const ROLE_OUTPUT: &str = "output";
pub const ROLE_CHECKOUT_AFTER: &str = "checkout-after";

/// One block of chapter text with the hints needed for classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl RawBlock {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }

    pub fn line_or_zero(&self) -> usize {
        self.line.unwrap_or(0)
    }
}

/// Parse a JSON array of blocks.
pub fn parse_block_json(text: &str) -> Result<Vec<RawBlock>, ReplayError> {
    serde_json::from_str(text).map_err(|err| ReplayError::Parse {
        line: err.line(),
        message: format!("invalid block JSON: {err}"),
    })
}

struct OpenFence<'a> {
    fence: char,
    fence_len: usize,
    info: String,
    start_line: usize,
    lines: Vec<(usize, &'a str)>,
}

/// Split fenced chapter text into raw blocks. Prose outside fences is dropped.
pub fn parse_chapter_text(input: &str) -> Result<Vec<RawBlock>, ReplayError> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence<'_>> = None;

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let (ws, rest) = split_leading_ws(line);
        let Some(current) = open.as_mut() else {
            if ws > MAX_FENCE_PREFIX_WS {
                continue;
            }
            if let Some((fence, fence_len, info)) = parse_fence_start(rest) {
                open = Some(OpenFence {
                    fence,
                    fence_len,
                    info,
                    start_line: line_no,
                    lines: Vec::new(),
                });
            }
            continue;
        };
        if ws > MAX_FENCE_PREFIX_WS || !is_fence_close(rest, current.fence, current.fence_len) {
            current.lines.push((line_no, line));
            continue;
        }
        if let Some(closed) = open.take() {
            blocks.extend(fence_to_blocks(closed)?);
        }
    }

    if let Some(unclosed) = open {
        let opener = unclosed.fence.to_string().repeat(unclosed.fence_len) + &unclosed.info;
        return Err(ReplayError::Parse {
            line: unclosed.start_line,
            message: format!("unterminated fence {opener:?}"),
        });
    }
    Ok(blocks)
}

#[derive(Default)]
struct FenceInfo {
    language: Option<String>,
    filename: Option<String>,
    commit_ref: Option<String>,
    tool: Option<String>,
    roles: Vec<String>,
}

fn parse_fence_info(info: &str, line: usize) -> Result<FenceInfo, ReplayError> {
    let mut parsed = FenceInfo::default();
    for (idx, token) in info.split_whitespace().enumerate() {
        if let Some((key, value)) = token.split_once('=') {
            let value = value.trim_matches('"').to_string();
            if value.is_empty() {
                return Err(ReplayError::Parse {
                    line,
                    message: format!("empty value for fence attribute {key:?}"),
                });
            }
            match key {
                "file" => parsed.filename = Some(value),
                "ref" => parsed.commit_ref = Some(value),
                "tool" => parsed.tool = Some(value),
                "lang" => parsed.language = Some(value),
                other => {
                    return Err(ReplayError::Parse {
                        line,
                        message: format!("unknown fence attribute {other:?}"),
                    })
                }
            }
        } else if idx == 0 {
            parsed.language = Some(token.to_string());
        } else if KNOWN_ROLES.contains(&token) {
            parsed.roles.push(token.to_string());
        } else {
            return Err(ReplayError::Parse {
                line,
                message: format!("unknown fence role {token:?}"),
            });
        }
    }
    Ok(parsed)
}

fn fence_to_blocks(fence: OpenFence<'_>) -> Result<Vec<RawBlock>, ReplayError> {
    let info = parse_fence_info(&fence.info, fence.start_line)?;
    let is_console = info
        .language
        .as_deref()
        .is_some_and(|lang| CONSOLE_LANGUAGES.contains(&lang));
    let prompted = fence.lines.iter().any(|(_, line)| is_prompt(line));
    if is_console && prompted && !info.roles.iter().any(|role| role == ROLE_OUTPUT) {
        return Ok(split_console(&fence, info));
    }

    let mut text = fence
        .lines
        .iter()
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    Ok(vec![RawBlock {
        text,
        language: info.language,
        filename: info.filename,
        commit_ref: info.commit_ref,
        tool: info.tool,
        roles: info.roles,
        expect: None,
        line: Some(fence.start_line),
    }])
}

/// One command block per prompt line, one output block per run of output lines.
fn split_console(fence: &OpenFence<'_>, info: FenceInfo) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut output: Vec<(usize, &str)> = Vec::new();
    let mut lines = fence.lines.iter();

    while let Some(&(line_no, line)) = lines.next() {
        if !is_prompt(line) {
            output.push((line_no, line));
            continue;
        }
        flush_output(&mut blocks, &mut output);
        let mut command = line.to_string();
        while command.ends_with('\\') {
            match lines.next() {
                Some(&(_, next)) => {
                    command.push('\n');
                    command.push_str(next);
                }
                None => break,
            }
        }
        blocks.push(RawBlock {
            text: command,
            language: info.language.clone(),
            line: Some(line_no),
            ..RawBlock::default()
        });
    }
    flush_output(&mut blocks, &mut output);

    // Fence-level markers describe the first listing the fence produced.
    if let Some(first) = blocks.first_mut() {
        first.filename = info.filename;
        first.commit_ref = info.commit_ref;
        first.tool = info.tool;
        first.roles.extend(info.roles);
    }
    blocks
}

fn is_prompt(line: &str) -> bool {
    line.starts_with("$ ") || line == "$"
}

fn flush_output(blocks: &mut Vec<RawBlock>, output: &mut Vec<(usize, &str)>) {
    if output.iter().all(|(_, line)| line.trim().is_empty()) {
        output.clear();
        return;
    }
    let line = output.first().map(|(line_no, _)| *line_no);
    let text = output
        .drain(..)
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n");
    blocks.push(RawBlock {
        text,
        roles: vec![ROLE_OUTPUT.to_string()],
        line,
        ..RawBlock::default()
    });
}

fn parse_fence_start(line: &str) -> Option<(char, usize, String)> {
    let trimmed = line.trim_end();
    let mut chars = trimmed.chars();
    let fence_char = chars.next()?;
    if fence_char != '`' && fence_char != '~' {
        return None;
    }

    let mut count = 1;
    for ch in chars.by_ref() {
        if ch == fence_char {
            count += 1;
        } else {
            break;
        }
    }
    if count < 3 {
        return None;
    }

    let info = trimmed[count..].trim().to_string();
    Some((fence_char, count, info))
}

fn is_fence_close(line: &str, fence: char, fence_len: usize) -> bool {
    let trimmed = line.trim_end();
    !trimmed.is_empty()
        && trimmed.chars().all(|ch| ch == fence)
        && trimmed.chars().count() >= fence_len
}

fn split_leading_ws(line: &str) -> (usize, &str) {
    let mut count = 0;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            count += 1;
        } else {
            break;
        }
    }
    (count, &line[count..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn splits_console_fences_into_commands_and_output() {
        let chapter = indoc! {"
            Run the tests:

            ```console tool=pytest
            $ pytest
            ===== 2 passed in 0.01s =====
            $ git status
            ```
        "};
        let blocks = parse_chapter_text(chapter).expect("parse chapter");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "$ pytest");
        assert_eq!(blocks[0].tool.as_deref(), Some("pytest"));
        assert_eq!(blocks[0].line, Some(4));
        assert!(blocks[1].has_role(ROLE_OUTPUT));
        assert_eq!(blocks[1].text, "===== 2 passed in 0.01s =====");
        assert_eq!(blocks[2].text, "$ git status");
        assert!(blocks[2].tool.is_none());
    }

    #[test]
    fn console_fence_without_prompts_stays_whole() {
        let chapter = "```bash\npip install django\n```\n";
        let blocks = parse_chapter_text(chapter).expect("parse chapter");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "pip install django\n");
        assert_eq!(blocks[0].language.as_deref(), Some("bash"));
        assert!(!blocks[0].has_role(ROLE_OUTPUT));
    }

    #[test]
    fn code_fence_keeps_attributes_and_roles() {
        let chapter = indoc! {"
            ~~~python file=src/app.py ref=ch01l003 dofirst
            print('hi')
            ~~~
        "};
        let blocks = parse_chapter_text(chapter).expect("parse chapter");
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.text, "print('hi')\n");
        assert_eq!(block.filename.as_deref(), Some("src/app.py"));
        assert_eq!(block.commit_ref.as_deref(), Some("ch01l003"));
        assert!(block.has_role(ROLE_DOFIRST));
        assert_eq!(block.line, Some(1));
    }

    #[test]
    fn joins_backslash_continuations() {
        let chapter = "```bash\n$ git commit \\\n  -m 'first'\n```\n";
        let blocks = parse_chapter_text(chapter).expect("parse chapter");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "$ git commit \\\n  -m 'first'");
    }

    #[test]
    fn unterminated_fence_is_a_parse_error() {
        let chapter = "intro\n\n```python file=a.py\nx = 1\n";
        let err = parse_chapter_text(chapter).expect_err("unterminated");
        match err {
            ReplayError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("unterminated"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_markers() {
        let err = parse_chapter_text("```python colour=blue\nx\n```\n").expect_err("bad key");
        assert!(matches!(err, ReplayError::Parse { line: 1, .. }));
        let err = parse_chapter_text("```python sometimes\nx\n```\n").expect_err("bad role");
        assert!(matches!(err, ReplayError::Parse { line: 1, .. }));
    }

    #[test]
    fn longer_inner_fence_does_not_close_outer() {
        let chapter = "````markdown\n```\ninner\n```\n````\n";
        let blocks = parse_chapter_text(chapter).expect("parse chapter");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "```\ninner\n```\n");
    }

    #[test]
    fn block_json_errors_carry_line() {
        let err = parse_block_json("[\n{\"text\": 1}\n]").expect_err("bad json");
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }));
        let blocks = parse_block_json(r#"[{"text": "$ ls", "ref": "ch01l001"}]"#)
            .expect("valid json");
        assert_eq!(blocks[0].commit_ref.as_deref(), Some("ch01l001"));
    }
}
