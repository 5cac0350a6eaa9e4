//! Line-oriented markdown scanning over raw bytes.
//!
//! All offsets are byte offsets into the original buffer. Lines are decoded
//! lossily for matching only, so invalid UTF-8 never shifts an offset.

use std::borrow::Cow;

use regex::Regex;

const FENCE: &str = "```";

/// One line of a document, without its line terminator.
#[derive(Debug, Clone)]
pub struct Line<'a> {
    /// Byte offset of the first byte of the line.
    pub offset: usize,
    /// Line text with any trailing `\r` removed.
    pub text: Cow<'a, str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Index into [`ScannedDoc::lines`].
    pub line: usize,
    pub offset: usize,
    pub level: u8,
    pub title: String,
}

/// A closed fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    pub open_line: usize,
    pub close_line: usize,
    /// Start of the opening fence line.
    pub offset: usize,
    /// One past the closing backticks.
    pub end: usize,
    /// Lowercased info-string language, empty when untagged.
    pub language: String,
}

impl Fence {
    pub fn len(&self) -> usize {
        self.end - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.offset
    }

    pub fn within(&self, start: usize, end: usize) -> bool {
        self.offset >= start && self.end <= end
    }
}

/// A leading `---` delimited YAML block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frontmatter {
    /// Byte range of the YAML text between the delimiters.
    pub content: (usize, usize),
    /// First byte after the closing delimiter line.
    pub body_start: usize,
}

#[derive(Debug)]
pub struct ScannedDoc<'a> {
    pub bytes: &'a [u8],
    pub lines: Vec<Line<'a>>,
    pub headings: Vec<Heading>,
    pub fences: Vec<Fence>,
    pub frontmatter: Option<Frontmatter>,
}

impl<'a> ScannedDoc<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// End offset of the section opened by heading `i`: the next heading at
    /// the same or a shallower level, else end of document.
    pub fn section_end(&self, i: usize) -> usize {
        let level = self.headings[i].level;
        self.headings[i + 1..]
            .iter()
            .find(|h| h.level <= level)
            .map_or(self.bytes.len(), |h| h.offset)
    }

    /// Lossily decoded text of a byte range.
    pub fn text(&self, start: usize, end: usize) -> Cow<'a, str> {
        let end = end.min(self.bytes.len());
        let start = start.min(end);
        String::from_utf8_lossy(&self.bytes[start..end])
    }

    /// Index of the last heading starting before `offset`.
    pub fn heading_before(&self, offset: usize) -> Option<usize> {
        self.headings.iter().rposition(|h| h.offset < offset)
    }

    /// Index of the line starting at or containing `offset`.
    pub fn line_at(&self, offset: usize) -> usize {
        match self.lines.binary_search_by(|l| l.offset.cmp(&offset)) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }
}

/// Split a buffer into lines and locate headings and closed fences.
///
/// Heading markers inside fenced code or frontmatter are ignored. An
/// unclosed fence produces no [`Fence`], and headings after it are not
/// recognised.
pub fn scan(bytes: &[u8]) -> ScannedDoc<'_> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| start + p);
        let raw = &bytes[start..end];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        lines.push(Line {
            offset: start,
            text: String::from_utf8_lossy(raw),
        });
        start = end + 1;
    }

    let frontmatter = find_frontmatter(bytes, &lines);
    let first_body_line = frontmatter.map_or(0, |fm| {
        lines
            .iter()
            .position(|l| l.offset >= fm.body_start)
            .unwrap_or(lines.len())
    });

    let mut headings = Vec::new();
    let mut fences = Vec::new();
    let mut open: Option<(usize, String)> = None;

    for (i, line) in lines.iter().enumerate().skip(first_body_line) {
        let trimmed = line.text.trim_start();
        if let Some(info) = trimmed.strip_prefix(FENCE) {
            match open.take() {
                None => open = Some((i, fence_language(info))),
                Some((open_line, language)) => {
                    let lead = line.text.len() - trimmed.len();
                    fences.push(Fence {
                        open_line,
                        close_line: i,
                        offset: lines[open_line].offset,
                        end: line.offset + lead + FENCE.len(),
                        language,
                    });
                }
            }
            continue;
        }

        if open.is_none()
            && let Some((level, title)) = parse_heading(&line.text)
        {
            headings.push(Heading {
                line: i,
                offset: line.offset,
                level,
                title,
            });
        }
    }

    ScannedDoc {
        bytes,
        lines,
        headings,
        fences,
        frontmatter,
    }
}

fn find_frontmatter(bytes: &[u8], lines: &[Line<'_>]) -> Option<Frontmatter> {
    if lines.first()?.text != "---" {
        return None;
    }
    let close = lines.iter().skip(1).position(|l| l.text == "---")? + 1;
    let content_start = lines.get(1).map_or(bytes.len(), |l| l.offset);
    let content_end = lines[close].offset.saturating_sub(1).max(content_start);
    let body_start = lines.get(close + 1).map_or(bytes.len(), |l| l.offset);
    Some(Frontmatter {
        content: (content_start, content_end),
        body_start,
    })
}

/// Parse an ATX heading: 1-6 `#` at column zero, whitespace, a title.
pub fn parse_heading(line: &str) -> Option<(u8, String)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u8, title.to_string()))
}

fn fence_language(info: &str) -> String {
    info.trim()
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '+'))
        .collect::<String>()
        .to_lowercase()
}

/// Structural summary of a markdown fragment.
///
/// Keeps heading lines outside fences and every fence marker. Inside
/// fences, keeps only lines matching `declarations` when given.
pub fn outline(content: &str, declarations: Option<&Regex>) -> String {
    let mut kept = Vec::new();
    let mut in_fence = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(FENCE) {
            in_fence = !in_fence;
            kept.push(line);
        } else if in_fence {
            if declarations.is_some_and(|re| re.is_match(line)) {
                kept.push(line);
            }
        } else if parse_heading(line).is_some() {
            kept.push(line);
        }
    }

    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Guide\nIntro.\n## Hammer\nBullish.\n```pine\n# not a heading\nplot(close)\n```\n## Shooting Star\nBearish.\n# Appendix\n";

    #[test]
    fn headings_skip_fenced_lines() {
        let doc = scan(DOC.as_bytes());
        let titles: Vec<_> =
            doc.headings.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["Guide", "Hammer", "Shooting Star", "Appendix"]);
        assert_eq!(doc.headings[1].level, 2);
    }

    #[test]
    fn section_ends_at_same_or_shallower_heading() {
        let doc = scan(DOC.as_bytes());
        let hammer = &doc.headings[1];
        let end = doc.section_end(1);
        let text = &DOC[hammer.offset..end];
        assert!(text.starts_with("## Hammer"));
        assert!(text.ends_with("```\n"));

        // The level-1 guide runs until the level-1 appendix.
        let guide_end = doc.section_end(0);
        assert_eq!(&DOC[guide_end..], "# Appendix\n");

        // Last heading runs to EOF.
        assert_eq!(doc.section_end(3), DOC.len());
    }

    #[test]
    fn fence_range_covers_markers() {
        let doc = scan(DOC.as_bytes());
        assert_eq!(doc.fences.len(), 1);
        let fence = &doc.fences[0];
        assert_eq!(fence.language, "pine");
        assert_eq!(
            &DOC[fence.offset..fence.end],
            "```pine\n# not a heading\nplot(close)\n```"
        );
    }

    #[test]
    fn unclosed_fence_is_dropped() {
        let doc = scan(b"## A\n```rust\nfn main() {}\n## B\n");
        assert!(doc.fences.is_empty());
        assert_eq!(doc.headings.len(), 1);
    }

    #[test]
    fn crlf_and_invalid_utf8_keep_offsets() {
        let bytes = b"## A\r\nbody \xff\r\n## B\r\n";
        let doc = scan(bytes);
        assert_eq!(doc.headings.len(), 2);
        assert_eq!(doc.headings[0].title, "A");
        assert_eq!(doc.headings[1].offset, 14);
        assert_eq!(&bytes[doc.headings[1].offset..], b"## B\r\n");
    }

    #[test]
    fn parse_heading_rules() {
        assert_eq!(parse_heading("## Doji"), Some((2, "Doji".into())));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### seven"), None);
        assert_eq!(parse_heading("#   "), None);
        assert_eq!(parse_heading(" ## indented"), None);
    }

    #[test]
    fn outline_keeps_structure_only() {
        let out = outline(DOC, None);
        assert_eq!(
            out,
            "# Guide\n## Hammer\n```pine\n```\n## Shooting Star\n# Appendix"
        );
    }

    #[test]
    fn outline_keeps_declarations_in_fences() {
        let re = Regex::new(r"^\s*(contract|function)\s").unwrap();
        let text = "## Token\n```solidity\ncontract Token {\n  uint x;\n  function mint() external {}\n}\n```\n";
        let out = outline(text, Some(&re));
        assert_eq!(
            out,
            "## Token\n```solidity\ncontract Token {\n  function mint() external {}\n```"
        );
    }

    #[test]
    fn frontmatter_is_not_scanned_for_headings() {
        let text = "---\nid: abc\n# comment: yes\n---\n# Title\nBody\n";
        let doc = scan(text.as_bytes());
        let fm = doc.frontmatter.unwrap();
        assert_eq!(&text[fm.content.0..fm.content.1], "id: abc\n# comment: yes");
        assert_eq!(&text[fm.body_start..], "# Title\nBody\n");
        assert_eq!(doc.headings.len(), 1);
        assert_eq!(doc.headings[0].title, "Title");
    }

    #[test]
    fn no_frontmatter_without_closing_delimiter() {
        let doc = scan(b"---\nid: abc\n# Title\n");
        assert!(doc.frontmatter.is_none());
        assert_eq!(doc.headings.len(), 1);
    }

    #[test]
    fn heading_before_and_line_at() {
        let doc = scan(DOC.as_bytes());
        let fence = &doc.fences[0];
        assert_eq!(doc.heading_before(fence.offset), Some(1));
        assert_eq!(doc.line_at(fence.offset), fence.open_line);
        assert_eq!(doc.line_at(fence.offset + 2), fence.open_line);
        assert_eq!(doc.heading_before(0), None);
    }
}
