//! Protected-span splitter: partitions Markdown into translatable prose and
//! spans that must be copied verbatim

use std::ops::Range;

use crate::core::models::{Segment, SegmentKind};

/// Default upper bound on characters per translation unit
pub const DEFAULT_MAX_UNIT_CHARS: usize = 4000;

/// HTML elements whose content runs until the matching closing tag
const RAW_TAGS: &[&str] = &["pre", "script", "style", "textarea"];

/// HTML elements that open a block running to the next blank line
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "center", "dd", "details", "dialog",
    "div", "dl", "dt", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5",
    "h6", "head", "header", "hr", "html", "iframe", "li", "main", "nav", "ol", "p", "section",
    "summary", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul", "video",
];

/// How an HTML block ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HtmlBlock {
    Comment,
    Raw(&'static str),
    UntilBlankLine,
}

/// Splits documents into segments
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    max_unit_chars: usize,
}

impl Default for Splitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNIT_CHARS)
    }
}

/// Split with default settings
pub fn split(text: &str) -> Vec<Segment> {
    Splitter::default().split(text)
}

impl Splitter {
    pub fn new(max_unit_chars: usize) -> Self {
        Self {
            max_unit_chars: max_unit_chars.max(1),
        }
    }

    /// Contiguous, non-overlapping segments whose concatenation is `text`.
    ///
    /// Prose is cut into chunks at blank lines first; each chunk becomes one
    /// unit, and the inline code inside it carries the same unit id so a
    /// sentence is never split around a code span.
    pub fn split(&self, text: &str) -> Vec<Segment> {
        let mut spans = Vec::new();
        let mut next_unit = 0;
        for (kind, range) in block_spans(text) {
            match kind {
                SegmentKind::Protected => spans.push((kind, range, None)),
                SegmentKind::Translatable => {
                    for chunk in self.chunk(text, range) {
                        let unit = Some(next_unit);
                        next_unit += 1;
                        for (kind, range) in inline_spans(text, chunk) {
                            spans.push((kind, range, unit));
                        }
                    }
                }
            }
        }

        let mut segments = Vec::with_capacity(spans.len());
        let mut line = 1;
        let mut counted_to = 0;
        for (kind, range, unit) in spans.into_iter().filter(|(_, r, _)| !r.is_empty()) {
            line += text[counted_to..range.start].matches('\n').count();
            counted_to = range.start;
            let mut segment = Segment::new(kind, range.clone(), &text[range]);
            segment.line = line;
            segment.unit = unit;
            segments.push(segment);
        }
        segments
    }

    /// Cut a long prose range at blank lines into pieces of at most
    /// `max_unit_chars`; a single oversized paragraph stays whole
    fn chunk(&self, text: &str, range: Range<usize>) -> Vec<Range<usize>> {
        if text[range.clone()].chars().count() <= self.max_unit_chars {
            return vec![range];
        }

        let mut pieces = Vec::new();
        let mut start = range.start;
        let slice = &text[range.clone()];
        let mut search = 0;
        while let Some(found) = slice[search..].find("\n\n") {
            let mut cut = search + found;
            while slice[cut..].starts_with('\n') {
                cut += 1;
            }
            pieces.push(start..range.start + cut);
            start = range.start + cut;
            search = cut;
        }
        if start < range.end {
            pieces.push(start..range.end);
        }

        let mut chunks: Vec<Range<usize>> = Vec::new();
        for piece in pieces {
            match chunks.last_mut() {
                Some(last) if text[last.start..piece.end].chars().count() <= self.max_unit_chars => {
                    last.end = piece.end;
                }
                _ => chunks.push(piece),
            }
        }
        chunks
    }
}

/// Lines with their byte offsets, each including its line terminator
fn lines_with_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .map(|line| {
            let start = offset;
            offset += line.len();
            (start, line)
        })
        .collect()
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Opening fence character and length
fn fence_open(line: &str) -> Option<(char, usize)> {
    let rest = line.trim_start_matches([' ', '\t']).trim_end();
    let ch = rest.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == ch).count();
    if len < 3 {
        return None;
    }
    if ch == '`' && rest[len..].contains('`') {
        return None;
    }
    Some((ch, len))
}

fn fence_close(line: &str, ch: char, len: usize) -> bool {
    let rest = line.trim();
    let run = rest.chars().take_while(|&c| c == ch).count();
    run >= len && rest.chars().all(|c| c == ch)
}

fn html_block_start(line: &str) -> Option<HtmlBlock> {
    let trimmed = line.trim();
    if trimmed.starts_with("<!--") {
        return Some(HtmlBlock::Comment);
    }
    let rest = trimmed.strip_prefix('<')?;
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(rest.len());
    let name = rest[..name_len].to_ascii_lowercase();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    match rest[name_len..].chars().next() {
        None | Some(' ') | Some('\t') | Some('>') | Some('/') => {}
        _ => return None,
    }

    if let Some(raw) = RAW_TAGS.iter().copied().find(|t| *t == name) {
        return Some(HtmlBlock::Raw(raw));
    }
    if BLOCK_TAGS.contains(&name.as_str()) {
        return Some(HtmlBlock::UntilBlankLine);
    }
    // a line holding nothing but one tag
    if trimmed.ends_with('>') && trimmed.matches('<').count() == 1 {
        return Some(HtmlBlock::UntilBlankLine);
    }
    None
}

/// Index of the first line at or after `from` satisfying `pred`
fn find_line(lines: &[(usize, &str)], from: usize, pred: impl Fn(&str) -> bool) -> Option<usize> {
    (from..lines.len()).find(|&j| pred(lines[j].1))
}

/// Block-level pass: front matter, fences and HTML blocks are protected
fn block_spans(text: &str) -> Vec<(SegmentKind, Range<usize>)> {
    let lines = lines_with_offsets(text);
    let end_of = |j: usize| lines[j].0 + lines[j].1.len();
    let mut spans = Vec::new();
    let mut prose_start: Option<usize> = None;
    let mut i = 0;

    let flush = |spans: &mut Vec<(SegmentKind, Range<usize>)>, prose: &mut Option<usize>, to: usize| {
        if let Some(from) = prose.take() {
            spans.push((SegmentKind::Translatable, from..to));
        }
    };

    let opens_front_matter = lines.first().map(|(_, l)| l.trim_end() == "---").unwrap_or(false)
        && lines.get(1).map(|(_, l)| l.contains(':')).unwrap_or(false);
    if opens_front_matter {
        if let Some(close) = find_line(&lines, 1, |l| matches!(l.trim_end(), "---" | "...")) {
            spans.push((SegmentKind::Protected, 0..end_of(close)));
            i = close + 1;
        }
    }

    while i < lines.len() {
        let (start, line) = lines[i];

        if let Some((ch, len)) = fence_open(line) {
            flush(&mut spans, &mut prose_start, start);
            let end = match find_line(&lines, i + 1, |l| fence_close(l, ch, len)) {
                Some(close) => {
                    i = close + 1;
                    end_of(close)
                }
                None => {
                    i = lines.len();
                    text.len()
                }
            };
            spans.push((SegmentKind::Protected, start..end));
            continue;
        }

        if let Some(block) = html_block_start(line) {
            flush(&mut spans, &mut prose_start, start);
            let close = match block {
                HtmlBlock::Comment => {
                    let after_open = line.find("<!--").map(|p| p + 4).unwrap_or(0);
                    if line[after_open..].contains("-->") {
                        Some(i)
                    } else {
                        find_line(&lines, i + 1, |l| l.contains("-->"))
                    }
                }
                HtmlBlock::Raw(tag) => {
                    let closing = format!("</{}", tag);
                    find_line(&lines, i, |l| l.to_ascii_lowercase().contains(&closing))
                }
                HtmlBlock::UntilBlankLine => {
                    find_line(&lines, i + 1, is_blank).map(|blank| blank - 1)
                }
            };
            let end = match close {
                Some(close) => {
                    i = close + 1;
                    end_of(close)
                }
                None => {
                    i = lines.len();
                    text.len()
                }
            };
            spans.push((SegmentKind::Protected, start..end));
            continue;
        }

        prose_start.get_or_insert(start);
        i += 1;
    }

    flush(&mut spans, &mut prose_start, text.len());
    spans
}

/// Whether the line starting at byte `pos` (just after a newline) is blank
fn blank_line_at(bytes: &[u8], pos: usize, limit: usize) -> bool {
    let mut j = pos;
    while j < limit && (bytes[j] == b' ' || bytes[j] == b'\t' || bytes[j] == b'\r') {
        j += 1;
    }
    j < limit && bytes[j] == b'\n'
}

fn backtick_run(bytes: &[u8], from: usize, limit: usize) -> usize {
    bytes[from..limit].iter().take_while(|&&b| b == b'`').count()
}

/// End of the code span closing a run of `run` backticks, searching within
/// the current paragraph
fn closing_backticks(bytes: &[u8], from: usize, limit: usize, run: usize) -> Option<usize> {
    let mut j = from;
    while j < limit {
        match bytes[j] {
            b'`' => {
                let len = backtick_run(bytes, j, limit);
                if len == run {
                    return Some(j + len);
                }
                j += len;
            }
            b'\n' if blank_line_at(bytes, j + 1, limit) => return None,
            _ => j += 1,
        }
    }
    None
}

/// Inline pass over a prose range: code spans are protected
fn inline_spans(text: &str, range: Range<usize>) -> Vec<(SegmentKind, Range<usize>)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = range.start;
    let mut i = range.start;

    while i < range.end {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = backtick_run(bytes, i, range.end);
        let escaped = i > range.start && bytes[i - 1] == b'\\';
        if !escaped {
            if let Some(end) = closing_backticks(bytes, i + run, range.end, run) {
                if cursor < i {
                    spans.push((SegmentKind::Translatable, cursor..i));
                }
                spans.push((SegmentKind::Protected, i..end));
                cursor = end;
                i = end;
                continue;
            }
        }
        i += run;
    }

    if cursor < range.end {
        spans.push((SegmentKind::Translatable, cursor..range.end));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(segments: &[Segment]) -> String {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    fn protected(segments: &[Segment]) -> Vec<&str> {
        segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Protected)
            .map(|s| s.text.as_str())
            .collect()
    }

    fn assert_contiguous(text: &str, segments: &[Segment]) {
        let mut pos = 0;
        for s in segments {
            assert_eq!(s.range.start, pos, "gap or overlap before {:?}", s);
            assert_eq!(&text[s.range.clone()], s.text);
            pos = s.range.end;
        }
        assert_eq!(pos, text.len());
    }

    const DOCUMENTS: &[&str] = &[
        "",
        "plain text without newline",
        "# Title\n\nAn algorithm is a procedure.\n",
        "Before\n\n```python\nprint('hi')\n```\n\nAfter `inline` code.\n",
        "---\ntitle: \"Test\"\n---\n\n# Hello\n\nText with ``double `tick` span`` here.\n",
        "Unterminated:\n\n```rust\nfn main() {}\n",
        "<div class=\"note\">\n  Raw block\n</div>\n\nParagraph.\n<!-- comment\nspanning -->\nTail",
        "CRLF line\r\n\r\n~~~\r\ncode\r\n~~~\r\n",
        "中文与 English 混排 `代码` 结束。\n\n* list `a`\n* list `b`\n",
        "Stray ` backtick and \\`escaped\\` ones.\n",
        "<pre>\n\nkeep\n\n</pre>\nafter\n",
    ];

    #[test]
    fn test_round_trip_reconstruction() {
        for doc in DOCUMENTS {
            let segments = split(doc);
            assert_eq!(&concat(&segments), doc);
            assert_contiguous(doc, &segments);
        }
    }

    #[test]
    fn test_round_trip_with_small_units() {
        let splitter = Splitter::new(10);
        for doc in DOCUMENTS {
            let segments = splitter.split(doc);
            assert_eq!(&concat(&segments), doc);
            assert_contiguous(doc, &segments);
        }
    }

    #[test]
    fn test_code_fence_is_protected() {
        let doc = "Intro\n\n```python\nprint('hi')\n```\n\nOutro\n";
        let segments = split(doc);
        assert_eq!(protected(&segments), vec!["```python\nprint('hi')\n```\n"]);
        assert_eq!(segments[0].text, "Intro\n\n");
        assert_eq!(segments[2].text, "\nOutro\n");
        assert_eq!(segments[1].line, 3);
        assert_eq!(segments[2].line, 6);
    }

    #[test]
    fn test_unterminated_fence_runs_to_end() {
        let doc = "Text\n```\nnever closed\nstill code";
        let segments = split(doc);
        assert_eq!(protected(&segments), vec!["```\nnever closed\nstill code"]);
    }

    #[test]
    fn test_closing_fence_must_be_long_enough() {
        let doc = "````\n```\nnested\n```\n````\nafter\n";
        let segments = split(doc);
        assert_eq!(protected(&segments), vec!["````\n```\nnested\n```\n````\n"]);
        assert_eq!(segments.last().unwrap().text, "after\n");
    }

    #[test]
    fn test_inline_code_spans() {
        let segments = split("Call `run()` or ``a ` b`` now.");
        assert_eq!(protected(&segments), vec!["`run()`", "``a ` b``"]);
        let prose: Vec<_> = segments
            .iter()
            .filter(|s| s.is_translatable())
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(prose, vec!["Call ", " or ", " now."]);
        assert!(segments.iter().all(|s| s.unit == Some(0)));
    }

    #[test]
    fn test_sentence_with_code_is_one_unit() {
        use crate::core::models::Document;
        use std::path::PathBuf;

        let doc = "Use `foo` to call `bar`.\n\n```\ncode\n```\n\nNext `x` paragraph.\n";
        let segments = Splitter::new(10).split(doc);
        let document = Document::new(PathBuf::new(), PathBuf::new(), segments);
        let units: Vec<_> = document
            .units()
            .iter()
            .map(|span| document.unit_text(span))
            .collect();
        assert_eq!(units, vec!["Use `foo` to call `bar`.\n\n", "\nNext `x` paragraph.\n"]);
        assert_eq!(
            document.translation_units()[0].source,
            "Use ⟦0⟧ to call ⟦1⟧."
        );
    }

    #[test]
    fn test_unmatched_backtick_is_text() {
        let segments = split("A stray ` here.\n\nAnd `code` there.");
        assert_eq!(protected(&segments), vec!["`code`"]);
    }

    #[test]
    fn test_inline_code_does_not_cross_paragraphs() {
        let segments = split("Open ` here\n\nclose ` there");
        assert!(protected(&segments).is_empty());
    }

    #[test]
    fn test_front_matter_is_protected() {
        let doc = "---\ntitle: Test\n---\nBody text.\n";
        let segments = split(doc);
        assert_eq!(protected(&segments), vec!["---\ntitle: Test\n---\n"]);
    }

    #[test]
    fn test_thematic_break_is_not_front_matter() {
        let segments = split("---\nJust prose after a rule.\n");
        assert!(protected(&segments).is_empty());
    }

    #[test]
    fn test_html_blocks() {
        let doc = "<table>\n<tr><td>x</td></tr>\n</table>\n\nText.\n<!-- note -->\nMore.\n";
        let segments = split(doc);
        assert_eq!(
            protected(&segments),
            vec!["<table>\n<tr><td>x</td></tr>\n</table>\n", "<!-- note -->\n"]
        );
    }

    #[test]
    fn test_raw_html_spans_blank_lines() {
        let doc = "<script>\n\nlet a = 1;\n\n</script>\nAfter.\n";
        let segments = split(doc);
        assert_eq!(protected(&segments), vec!["<script>\n\nlet a = 1;\n\n</script>\n"]);
    }

    #[test]
    fn test_inline_html_stays_prose() {
        let segments = split("<b>Note</b>: read the <em>manual</em>.\n");
        assert!(protected(&segments).is_empty());
        assert!(split("<https://example.com>\n")
            .iter()
            .all(|s| s.is_translatable()));
    }

    #[test]
    fn test_long_prose_is_chunked_at_blank_lines() {
        let doc = "aaaa aaaa\n\nbbbb bbbb\n\ncccc cccc\n";
        let segments = Splitter::new(22).split(doc);
        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa aaaa\n\nbbbb bbbb\n\n", "cccc cccc\n"]);
        assert!(segments.iter().all(|s| s.is_translatable()));
        assert_eq!(segments[0].unit, Some(0));
        assert_eq!(segments[1].unit, Some(1));
    }

    #[test]
    fn test_oversized_paragraph_stays_whole() {
        let doc = "one very long paragraph without any blank line";
        let segments = Splitter::new(5).split(doc);
        assert_eq!(segments.len(), 1);
    }
}
