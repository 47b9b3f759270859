//! Elision-aware matching of code listings against file contents.
//!
//! Book listings abbreviate unchanged code with `[...]` lines, often behind a
//! comment leader. Each run of lines between markers is a chunk; a listing
//! matches a file when all chunks appear, in order, as consecutive lines.

const COMMENT_LEADERS: &[&str] = &["<!--", "-->", "//", "/*", "*/", "#", "--", "{#", "#}"];
const ELISION: &str = "[...]";

pub(super) fn is_elision(line: &str) -> bool {
    let mut rest = line.trim();
    loop {
        let before = rest;
        for leader in COMMENT_LEADERS {
            rest = rest.strip_prefix(leader).unwrap_or(rest).trim();
            rest = rest.strip_suffix(leader).unwrap_or(rest).trim();
        }
        if rest == before {
            break;
        }
    }
    rest == ELISION
}

pub(super) fn is_elided(listing: &str) -> bool {
    listing.lines().any(is_elision)
}

/// Chunks of the listing between elision markers, trailing whitespace removed.
pub(super) fn split_chunks(listing: &str) -> Vec<Vec<&str>> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in listing.lines() {
        if is_elision(line) {
            push_chunk(&mut chunks, &mut current);
        } else {
            current.push(line.trim_end());
        }
    }
    push_chunk(&mut chunks, &mut current);
    chunks
}

fn push_chunk<'a>(chunks: &mut Vec<Vec<&'a str>>, current: &mut Vec<&'a str>) {
    while current.last().is_some_and(|line| line.is_empty()) {
        current.pop();
    }
    let leading = current.iter().take_while(|line| line.is_empty()).count();
    current.drain(..leading);
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

pub(super) fn contains_chunks_in_order(file: &str, chunks: &[Vec<&str>]) -> bool {
    let lines: Vec<&str> = file.lines().map(str::trim_end).collect();
    let mut start = 0;
    for chunk in chunks {
        match find_chunk(&lines[start..], chunk) {
            Some(offset) => start += offset + chunk.len(),
            None => return false,
        }
    }
    true
}

fn find_chunk(lines: &[&str], chunk: &[&str]) -> Option<usize> {
    if chunk.len() > lines.len() {
        return None;
    }
    lines.windows(chunk.len()).position(|window| window == chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn recognizes_commented_markers() {
        assert!(is_elision("[...]"));
        assert!(is_elision("    # [...]"));
        assert!(is_elision("<!-- [...] -->"));
        assert!(is_elision("// [...]"));
        assert!(!is_elision("    ..."));
        assert!(!is_elision("items = [...]  # placeholder"));
    }

    #[test]
    fn chunks_match_in_order_only() {
        let file = indoc! {"
            from django.shortcuts import render


            def home_page(request):
                return render(request, \"home.html\")


            def view_list(request):
                return render(request, \"list.html\")
        "};
        let listing = indoc! {"
            from django.shortcuts import render
            [...]
            def view_list(request):
                return render(request, \"list.html\")
        "};
        let chunks = split_chunks(listing);
        assert_eq!(chunks.len(), 2);
        assert!(contains_chunks_in_order(file, &chunks));

        let reversed = vec![chunks[1].clone(), chunks[0].clone()];
        assert!(!contains_chunks_in_order(file, &reversed));
    }

    #[test]
    fn blank_edges_of_chunks_are_dropped() {
        let chunks = split_chunks("\n\nx = 1\n\n# [...]\n\ny = 2\n");
        assert_eq!(chunks, vec![vec!["x = 1"], vec!["y = 2"]]);
        assert!(is_elided("x = 1\n# [...]\n"));
        assert!(!is_elided("x = 1\n"));
    }
}
