//! Locates an `old` fragment inside file content using progressively looser
//! matching, then substitutes `new`. The first strategy that produces at
//! least one candidate wins; later strategies are never consulted. A winning
//! strategy with more than one non-overlapping candidate is ambiguous unless
//! the caller asked to replace every occurrence.

use std::ops::Range;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    NotFound,
    NotUnique { count: usize },
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::NotFound => write!(f, "the text to replace was not found"),
            PatchError::NotUnique { count } => {
                write!(f, "the text to replace matched {count} locations")
            }
        }
    }
}

impl std::error::Error for PatchError {}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub content: String,
    /// The span actually substituted (first occurrence), which after fuzzy
    /// matching may differ from the literal `old` input.
    pub matched: String,
    pub replacement: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Exact,
    LineTrimmed,
    BlockAnchor,
    WhitespaceNormalized,
    IndentFlexible,
    EscapeNormalized,
    TrimmedBoundary,
    ContextAware,
}

const STRATEGY_ORDER: [Strategy; 8] = [
    Strategy::Exact,
    Strategy::LineTrimmed,
    Strategy::BlockAnchor,
    Strategy::WhitespaceNormalized,
    Strategy::IndentFlexible,
    Strategy::EscapeNormalized,
    Strategy::TrimmedBoundary,
    Strategy::ContextAware,
];

pub fn apply(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<PatchOutcome, PatchError> {
    if old.is_empty() {
        return Err(PatchError::NotFound);
    }

    for strategy in STRATEGY_ORDER {
        let spans = find_candidates(strategy, content, old);
        if spans.is_empty() {
            continue;
        }
        if spans.len() > 1 && !replace_all {
            return Err(PatchError::NotUnique { count: spans.len() });
        }

        let replacement = replacement_text(strategy, old, new);
        let chosen: &[Range<usize>] = if replace_all { &spans } else { &spans[..1] };

        let mut out = String::with_capacity(content.len());
        let mut cursor = 0;
        for span in chosen {
            out.push_str(&content[cursor..span.start]);
            out.push_str(&replacement);
            cursor = span.end;
        }
        out.push_str(&content[cursor..]);

        return Ok(PatchOutcome {
            content: out,
            matched: content[spans[0].clone()].to_string(),
            replacement: replacement.to_string(),
            occurrences: chosen.len(),
        });
    }

    Err(PatchError::NotFound)
}

fn find_candidates(strategy: Strategy, content: &str, old: &str) -> Vec<Range<usize>> {
    match strategy {
        Strategy::Exact => find_exact(content, old),
        Strategy::LineTrimmed => find_line_trimmed(content, old),
        Strategy::BlockAnchor => find_block_anchor(content, old),
        Strategy::WhitespaceNormalized => find_whitespace_normalized(content, old),
        Strategy::IndentFlexible => find_indent_flexible(content, old),
        Strategy::EscapeNormalized => find_escape_normalized(content, old),
        Strategy::TrimmedBoundary => find_trimmed_boundary(content, old),
        Strategy::ContextAware => find_context_aware(content, old),
    }
}

/// Line-oriented strategies match spans that exclude the trailing newline,
/// and boundary-trimming strategies match spans that exclude surrounding
/// whitespace. The replacement has to be adjusted the same way or the
/// substitution would duplicate what the span left out.
fn replacement_text<'a>(strategy: Strategy, old: &str, new: &'a str) -> std::borrow::Cow<'a, str> {
    use std::borrow::Cow;
    match strategy {
        Strategy::Exact | Strategy::EscapeNormalized => Cow::Borrowed(new),
        Strategy::LineTrimmed
        | Strategy::BlockAnchor
        | Strategy::IndentFlexible
        | Strategy::ContextAware => {
            if old.ends_with('\n') && new.ends_with('\n') {
                Cow::Borrowed(&new[..new.len() - 1])
            } else {
                Cow::Borrowed(new)
            }
        }
        Strategy::WhitespaceNormalized | Strategy::TrimmedBoundary => Cow::Borrowed(new.trim()),
    }
}

// ---------------------------------------------------------------------------
// strategies

fn find_exact(content: &str, old: &str) -> Vec<Range<usize>> {
    content
        .match_indices(old)
        .map(|(i, m)| i..i + m.len())
        .collect()
}

/// Byte spans of each line, exclusive of the terminating newline.
fn line_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            spans.push((start, i));
            start = i + 1;
        }
    }
    spans.push((start, content.len()));
    spans
}

fn line_at<'a>(content: &'a str, spans: &[(usize, usize)], idx: usize) -> &'a str {
    let (s, e) = spans[idx];
    content[s..e].trim_end_matches('\r')
}

/// Greedy non-overlapping scan over `n`-line windows.
fn scan_windows<F>(content: &str, n: usize, mut matches: F) -> Vec<Range<usize>>
where
    F: FnMut(&str, &[(usize, usize)], usize) -> bool,
{
    let spans = line_spans(content);
    if n == 0 || spans.len() < n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut i = 0;
    while i + n <= spans.len() {
        if matches(content, &spans, i) {
            out.push(spans[i].0..spans[i + n - 1].1);
            i += n;
        } else {
            i += 1;
        }
    }
    out
}

fn find_line_trimmed(content: &str, old: &str) -> Vec<Range<usize>> {
    let old_lines: Vec<&str> = old.lines().collect();
    if old_lines.is_empty() {
        return Vec::new();
    }
    let n = old_lines.len();
    scan_windows(content, n, |c, spans, i| {
        old_lines
            .iter()
            .enumerate()
            .all(|(k, ol)| line_at(c, spans, i + k).trim() == ol.trim())
    })
}

fn find_block_anchor(content: &str, old: &str) -> Vec<Range<usize>> {
    let old_lines: Vec<&str> = old.lines().collect();
    let n = old_lines.len();
    if n < 3 {
        return Vec::new();
    }
    let first = old_lines[0].trim();
    let last = old_lines[n - 1].trim();

    let spans = line_spans(content);
    if spans.len() < n {
        return Vec::new();
    }

    let mut candidates: Vec<(Range<usize>, f64)> = Vec::new();
    let mut i = 0;
    while i + n <= spans.len() {
        if line_at(content, &spans, i).trim() == first
            && line_at(content, &spans, i + n - 1).trim() == last
        {
            let mut total = 0.0;
            let interior = n - 2;
            for k in 1..n - 1 {
                total += similarity(line_at(content, &spans, i + k).trim(), old_lines[k].trim());
            }
            let score = if interior == 0 {
                1.0
            } else {
                total / interior as f64
            };
            candidates.push((spans[i].0..spans[i + n - 1].1, score));
            i += n;
        } else {
            i += 1;
        }
    }

    match candidates.len() {
        0 => Vec::new(),
        1 => vec![candidates.remove(0).0],
        _ => {
            let best = candidates
                .into_iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .expect("non-empty candidates");
            if best.1 >= 0.3 { vec![best.0] } else { Vec::new() }
        }
    }
}

/// Collapse every whitespace run to a single space, keeping a byte map back
/// into the original text.
fn collapse_ws_with_map(content: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(content.len());
    let mut map = Vec::with_capacity(content.len());
    let mut in_ws = false;
    for (i, c) in content.char_indices() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                map.push(i);
                in_ws = true;
            }
        } else {
            in_ws = false;
            out.push(c);
            for _ in 0..c.len_utf8() {
                map.push(i);
            }
        }
    }
    (out, map)
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_whitespace_normalized(content: &str, old: &str) -> Vec<Range<usize>> {
    let needle = collapse_ws(old.trim());
    if needle.is_empty() {
        return Vec::new();
    }
    let (haystack, map) = collapse_ws_with_map(content);

    let direct: Vec<Range<usize>> = haystack
        .match_indices(&needle)
        .map(|(i, m)| {
            let start = map[i];
            let end = map.get(i + m.len()).copied().unwrap_or(content.len());
            start..end
        })
        .collect();
    if !direct.is_empty() {
        return direct;
    }

    // Word-boundary fallback: tokens in order, any whitespace between them.
    let tokens: Vec<&str> = old.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut pattern = tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join(r"\s+");
    if tokens[0].chars().next().is_some_and(is_word) {
        pattern.insert_str(0, r"\b");
    }
    if tokens[tokens.len() - 1].chars().last().is_some_and(is_word) {
        pattern.push_str(r"\b");
    }
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.find_iter(content).map(|m| m.range()).collect()
}

fn leading_ws_chars(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn strip_indent(line: &str, chars: usize) -> &str {
    let mut idx = 0;
    for (count, (i, c)) in line.char_indices().enumerate() {
        if count >= chars || !c.is_whitespace() {
            idx = i;
            break;
        }
        idx = i + c.len_utf8();
    }
    &line[idx..]
}

fn common_indent(lines: &[&str]) -> usize {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_ws_chars(l))
        .min()
        .unwrap_or(0)
}

fn find_indent_flexible(content: &str, old: &str) -> Vec<Range<usize>> {
    let old_lines: Vec<&str> = old.lines().collect();
    if old_lines.is_empty() {
        return Vec::new();
    }
    let n = old_lines.len();
    let old_indent = common_indent(&old_lines);
    let stripped_old: Vec<&str> = old_lines
        .iter()
        .map(|l| strip_indent(l, old_indent).trim_end())
        .collect();

    scan_windows(content, n, |c, spans, i| {
        let window: Vec<&str> = (0..n).map(|k| line_at(c, spans, i + k)).collect();
        let indent = common_indent(&window);
        window
            .iter()
            .zip(&stripped_old)
            .all(|(w, o)| strip_indent(w, indent).trim_end() == *o)
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('$') => out.push('$'),
            Some('`') => out.push('`'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn find_escape_normalized(content: &str, old: &str) -> Vec<Range<usize>> {
    let unescaped = unescape(old);
    if unescaped == old {
        return Vec::new();
    }
    find_exact(content, &unescaped)
}

fn find_trimmed_boundary(content: &str, old: &str) -> Vec<Range<usize>> {
    let trimmed = old.trim();
    if trimmed == old || trimmed.is_empty() {
        return Vec::new();
    }
    find_exact(content, trimmed)
}

fn find_context_aware(content: &str, old: &str) -> Vec<Range<usize>> {
    let old_lines: Vec<&str> = old.lines().collect();
    let n = old_lines.len();
    if n < 3 {
        return Vec::new();
    }
    let first = old_lines[0].trim();
    let last = old_lines[n - 1].trim();

    scan_windows(content, n, |c, spans, i| {
        if line_at(c, spans, i).trim() != first || line_at(c, spans, i + n - 1).trim() != last {
            return false;
        }
        let mut total = 0usize;
        let mut matched = 0usize;
        for k in 1..n - 1 {
            let ol = old_lines[k].trim();
            if ol.is_empty() {
                continue;
            }
            total += 1;
            if line_at(c, spans, i + k).trim() == ol {
                matched += 1;
            }
        }
        total == 0 || matched * 2 >= total
    })
}

// ---------------------------------------------------------------------------
// similarity

fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    let mut prev_row: Vec<usize> = (0..=n).collect();
    let mut curr_row = vec![0usize; n + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[n]
}

/// Normalized similarity in [0, 1]; two empty strings are identical.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_round_trips() {
        let content = "alpha\nbeta\ngamma\n";
        let patched = apply(content, "beta", "delta", false).unwrap();
        assert_eq!(patched.content, "alpha\ndelta\ngamma\n");
        let back = apply(&patched.content, "delta", "beta", false).unwrap();
        assert_eq!(back.content, content);
    }

    #[test]
    fn duplicate_exact_match_is_ambiguous() {
        let err = apply("foo bar foo", "foo", "baz", false).unwrap_err();
        assert_eq!(err, PatchError::NotUnique { count: 2 });
    }

    #[test]
    fn replace_all_substitutes_every_occurrence() {
        let patched = apply("foo bar foo", "foo", "qux", true).unwrap();
        assert_eq!(patched.content, "qux bar qux");
        assert_eq!(patched.occurrences, 2);
    }

    #[test]
    fn no_strategy_match_is_not_found() {
        let err = apply("alpha beta", "gamma", "delta", false).unwrap_err();
        assert_eq!(err, PatchError::NotFound);
    }

    #[test]
    fn line_trimmed_tolerates_reindentation() {
        let content = "if x {\n    go();\n}\n";
        let old = "if x {\n  go();\n}";
        let patched = apply(content, old, "if x {\n    stop();\n}", false).unwrap();
        assert_eq!(patched.content, "if x {\n    stop();\n}\n");
        assert_eq!(patched.matched, "if x {\n    go();\n}");
    }

    #[test]
    fn exact_substring_keeps_surrounding_indentation() {
        let content = "  foo();\n  baz();\n";
        let patched = apply(content, "foo();\n", "bar();\n", false).unwrap();
        assert_eq!(patched.content, "  bar();\n  baz();\n");
    }

    #[test]
    fn block_anchor_accepts_edited_interior() {
        let content = "fn run() {\n    let total = count + 1;\n    emit(total);\n}\n";
        let old = "fn run() {\n    let total = count + 2;\n    emit(total);\n}";
        let new = "fn run() {\n    emit(count);\n}";
        let patched = apply(content, old, new, false).unwrap();
        assert_eq!(patched.content, "fn run() {\n    emit(count);\n}\n");
    }

    #[test]
    fn block_anchor_picks_best_of_several_candidates() {
        let content = "if ready {\n    send(1);\n}\nif ready {\n    retry_send(1);\n}\n";
        let old = "if ready {\n    retry_send(2);\n}";
        let spans = find_block_anchor(content, old);
        assert_eq!(spans.len(), 1);
        assert!(content[spans[0].clone()].contains("retry_send"));
    }

    #[test]
    fn block_anchor_rejects_dissimilar_candidate_sets() {
        let content = "{\n    aaaa\n}\n{\n    bbbb\n}\n";
        let old = "{\n    zzzzzzzz\n}";
        assert!(find_block_anchor(content, old).is_empty());
    }

    #[test]
    fn whitespace_normalized_collapses_runs() {
        let content = "let  x   =  1;";
        let patched = apply(content, "let x = 1;", "let x = 2;", false).unwrap();
        assert_eq!(patched.content, "let x = 2;");
        assert_eq!(patched.matched, "let  x   =  1;");
    }

    #[test]
    fn indent_flexible_matches_shifted_blocks() {
        let content = "mod m {\n        fn f() {\n            body();\n        }\n}\n";
        let old = "fn f() {\n    body();\n}";
        let new = "fn f() {\n    other();\n}";
        let patched = apply(content, old, new, false).unwrap();
        assert!(patched.content.contains("other();"));
        assert!(!patched.content.contains("body();"));
    }

    #[test]
    fn indent_flexible_preserves_relative_indentation() {
        let content = "    a {\n        b;\n    }\n";
        let spans = find_indent_flexible(content, "a {\n    b;\n}");
        assert_eq!(spans.len(), 1);
        // Relative indentation is significant: a flattened block is no match.
        assert!(find_indent_flexible(content, "a {\nb;\n}").is_empty());
    }

    #[test]
    fn trimmed_boundary_finds_literal_core() {
        let spans = find_trimmed_boundary("start middle end", "\n  middle  \n");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], 6..12);
    }

    #[test]
    fn escape_normalized_unescapes_literals() {
        let content = "first\nsecond";
        let patched = apply(content, "first\\nsecond", "first\\nthird", false).unwrap();
        // The replacement is inserted verbatim for this strategy.
        assert_eq!(patched.content, "first\\nthird");
        assert_eq!(patched.matched, "first\nsecond");
    }

    #[test]
    fn trimmed_boundary_ignores_surrounding_whitespace() {
        let content = "start middle end";
        let patched = apply(content, "\n  middle  \n", "centre", false).unwrap();
        assert_eq!(patched.content, "start centre end");
    }

    #[test]
    fn context_aware_requires_half_the_interior() {
        let content = "begin\none\ntwo\nthree\nfour\nend\n";
        // 2 of 4 interior lines exact: accepted.
        let ok = find_context_aware(content, "begin\none\nX\nthree\nY\nend");
        assert_eq!(ok.len(), 1);
        // 1 of 4 interior lines exact: rejected.
        let bad = find_context_aware(content, "begin\none\nX\nY\nZ\nend");
        assert!(bad.is_empty());
    }

    #[test]
    fn similarity_is_normalized() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert!(similarity("kitten", "sitting") > 0.5);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", "ab"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }
}
