//! Entity detectors.
//!
//! Each detector looks at one scanned document and reports the domain
//! entities it recognises, with the byte range that reproduces each one.
//! Identifier allocation, section ownership and cross-reference
//! resolution are left to the indexer.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    entry_id::slugify,
    markdown::{Fence, ScannedDoc},
    schema::EntityKind,
    text_util::{
        DESCRIPTION_MAX_CHARS,
        SUMMARY_MAX_CHARS,
        collapse_whitespace,
        first_paragraph,
        static_regex,
        truncate_chars,
    },
};

/// Characters of an entity's text examined for classification hints.
const HINT_WINDOW_CHARS: usize = 500;

/// Candlestick pattern vocabulary.
pub const KNOWN_PATTERNS: &[&str] = &[
    "hammer",
    "hanging man",
    "inverted hammer",
    "shooting star",
    "bullish engulfing",
    "bearish engulfing",
    "engulfing",
    "morning star",
    "evening star",
    "piercing line",
    "piercing",
    "dark cloud cover",
    "dark cloud",
    "doji",
    "dragonfly doji",
    "gravestone doji",
    "long-legged doji",
    "spinning top",
    "marubozu",
    "harami",
    "bullish harami",
    "bearish harami",
    "tweezers",
    "tweezer top",
    "tweezer bottom",
    "three white soldiers",
    "three black crows",
    "three inside up",
    "three inside down",
    "three outside up",
    "three outside down",
    "rising three methods",
    "falling three methods",
    "belt hold",
    "counterattack",
    "upside gap two crows",
    "three mountains",
    "three rivers",
    "dumpling top",
    "frypan bottom",
    "tower top",
    "tower bottom",
    "tri-star",
    "rickshaw man",
    "separating lines",
    "tasuki gap",
    "window",
    "pin bar",
    "inside bar",
];

const BULLISH_HINTS: &[&str] = &[
    "bullish",
    "hammer",
    "morning star",
    "piercing",
    "white soldiers",
    "dragonfly",
    "inverted hammer",
    "engulfing bullish",
    "belt hold bullish",
    "rising",
    "three inside up",
    "three outside up",
];

const BEARISH_HINTS: &[&str] = &[
    "bearish",
    "hanging man",
    "evening star",
    "dark cloud",
    "black crows",
    "gravestone",
    "shooting star",
    "engulfing bearish",
    "belt hold bearish",
    "falling",
    "three inside down",
    "three outside down",
];

const THREE_CANDLE_HINTS: &[&str] = &[
    "three",
    "tri-star",
    "three white",
    "three black",
    "three inside",
    "three outside",
    "three methods",
    "three mountains",
    "three rivers",
];

const TWO_CANDLE_HINTS: &[&str] = &[
    "engulfing",
    "harami",
    "tweezer",
    "piercing",
    "dark cloud",
    "counterattack",
    "separating",
    "inside bar",
];

const STRATEGY_HINTS: &[&str] =
    &["strategy", "setup", "entry", "exit", "trade", "system", "method"];

const INDICATORS: &[&str] = &[
    "rsi",
    "macd",
    "stochastic",
    "moving average",
    "sma",
    "ema",
    "bollinger",
    "fibonacci",
    "volume",
    "atr",
    "adx",
    "obv",
];

/// Words the contract regexes capture that are never contract names.
const SOLIDITY_KEYWORDS: &[&str] = &[
    "event", "if", "for", "not", "with", "support", "supporting", "address",
    "interface", "first", "vm", "wallet", "exploits", "paymenttoken", "id",
    "is", "has", "the", "or", "and", "new", "this", "self", "type", "using",
    "return", "returns", "public", "private", "internal", "external", "view",
    "pure", "payable", "memory", "storage", "calldata", "override", "virtual",
    "abstract", "function", "modifier", "constructor", "receive", "fallback",
    "emit", "require", "revert", "assert", "mapping", "struct", "enum",
    "uint256", "uint128", "uint64", "uint32", "uint8", "int256", "bool",
    "string", "bytes", "bytes32", "bytes4", "uint", "int",
];

/// Pine keywords that look like function headings.
const PINE_RESERVED: &[&str] = &[
    "if", "else", "for", "while", "switch", "var", "varip", "import",
    "export", "method", "type", "true", "false", "na", "and", "or", "not",
    "return", "continue", "break", "overview", "introduction", "example",
    "examples", "notes", "syntax", "arguments", "returns", "remarks",
];

/// Built-in Pine namespaces recognised in inline calls.
const PINE_NAMESPACES: &[&str] = &[
    "ta", "math", "str", "array", "matrix", "map", "strategy", "chart",
    "color", "input", "label", "line", "box", "table", "linefill", "polyline",
    "request", "ticker", "timeframe", "syminfo", "bar_index", "runtime",
    "alert", "log", "type",
];

static PAREN_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"^(.+?)\s*\(.*?\)\s*$"));
static PAREN_ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"[（(]([^)）]+?)[)）]"));
static JAPANESE_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)Japanese(?:\s+name)?:\s*(\w+)"));
static TIMEFRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"\b(\d+[hHmMdDwW]|daily|weekly|monthly|hourly)\b")
});
static CONTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"\b(contract|interface|library)\s+(\w+)")
});
static STANDARD_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)\b(?:ERC|EIP)-?(\d{2,5})\b"));
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r#"import\s+.*?["'](.+?)["']"#));
static FILE_ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)^File:\s*`(.+?)`"));
static FUNCTION_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"^((?:[a-z]\w*\.)?[a-z_]\w*)\s*(?:\(|$)")
});
static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"([a-zA-Z_]\w*(?:\.\w+)*)\s*\(([^)]*)\)\s*(?:→|->|=>)\s*(.+)")
});
static INLINE_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"(?i)\b([a-z][a-z0-9]*\.[a-z_][a-z0-9_]*)\s*\(")
});
static EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r"export\s+(?:default\s+)?(?:async\s+)?(?:function|const)\s+(\w+)")
});
static IMPORT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r#"import\s+.*?from\s+["'](.+?)["']"#));

/// File extensions treated as prose rather than templates.
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// The document a detector inspects.
pub struct DocContext<'a> {
    /// Relative `/` separated path of the document.
    pub source_file: &'a str,
    pub doc: &'a ScannedDoc<'a>,
}

/// One entity found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub kind: EntityKind,
    pub name: String,
    /// Identifier stem placed after the kind prefix.
    pub slug: String,
    pub alias: Option<String>,
    pub description: String,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub attributes: BTreeMap<String, String>,
    pub tags: Vec<String>,
    /// Candidate entity ids; unknown ids are dropped by the indexer.
    pub see_also: Vec<String>,
    pub popularity: u64,
    /// Drop this detection when its identifier is already taken instead of
    /// allocating a disambiguated one.
    pub first_wins: bool,
}

impl Detection {
    fn new(kind: EntityKind, name: &str, start: usize, end: usize) -> Self {
        Self {
            kind,
            name: name.to_string(),
            slug: slugify(name),
            alias: None,
            description: String::new(),
            byte_offset: start,
            byte_length: end.saturating_sub(start),
            attributes: BTreeMap::new(),
            tags: Vec::new(),
            see_also: Vec::new(),
            popularity: 0,
            first_wins: false,
        }
    }

    fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(key.to_string(), value);
        }
        self
    }
}

/// Recognises one family of domain entities in a scanned document.
pub trait EntityDetector: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection>;
}

/// Headings at levels 2-4, each spanning to the next heading at level 4
/// or shallower.
fn entity_headings<'a>(
    doc: &'a ScannedDoc<'a>,
) -> impl Iterator<Item = (usize, usize, usize)> + 'a {
    doc.headings
        .iter()
        .enumerate()
        .filter(|(_, h)| (2..=4).contains(&h.level))
        .map(move |(i, h)| {
            let end = doc.headings[i + 1..]
                .iter()
                .find(|next| next.level <= 4)
                .map_or(doc.len(), |next| next.offset);
            (i, h.offset, end)
        })
}

/// Non-empty lines after the heading until the next heading or fence.
fn description_after(doc: &ScannedDoc<'_>, heading: usize, end: usize) -> String {
    let start_line = doc.headings[heading].line + 1;
    let mut parts = Vec::new();
    for line in doc.lines.iter().skip(start_line) {
        if line.offset >= end {
            break;
        }
        let text = line.text.trim();
        if text.starts_with('#') || text.starts_with("```") {
            break;
        }
        if !text.is_empty() {
            parts.push(text);
        }
    }
    truncate_chars(&parts.join(" "), DESCRIPTION_MAX_CHARS)
}

fn count_hints(text: &str, hints: &[&str]) -> usize {
    hints.iter().filter(|h| text.contains(*h)).count()
}

fn signal(text: &str) -> &'static str {
    let bull = count_hints(text, BULLISH_HINTS);
    let bear = count_hints(text, BEARISH_HINTS);
    match bull.cmp(&bear) {
        std::cmp::Ordering::Greater => "bullish",
        std::cmp::Ordering::Less => "bearish",
        std::cmp::Ordering::Equal => "neutral",
    }
}

fn pattern_type(text: &str) -> &'static str {
    if text.contains("reversal") {
        "reversal"
    } else if text.contains("continuation") {
        "continuation"
    } else if ["doji", "indecision", "spinning"]
        .iter()
        .any(|w| text.contains(w))
    {
        "indecision"
    } else {
        ""
    }
}

fn candle_count(title: &str) -> u8 {
    if THREE_CANDLE_HINTS.iter().any(|h| title.contains(h)) {
        3
    } else if TWO_CANDLE_HINTS.iter().any(|h| title.contains(h)) {
        2
    } else {
        1
    }
}

fn reliability(text: &str) -> &'static str {
    if ["high reliability", "highly reliable", "strong"]
        .iter()
        .any(|w| text.contains(w))
    {
        "high"
    } else if text.contains("moderate") || text.contains("medium") {
        "medium"
    } else if text.contains("low reliability") || text.contains("weak") {
        "low"
    } else {
        ""
    }
}

fn pattern_category(title: &str, candles: u8, kind: &str) -> &'static str {
    let doji = title.contains("doji");
    match (candles, kind) {
        (1, _) if doji => "doji",
        (1, "reversal") => "single-reversal",
        (2, "reversal") => "dual-reversal",
        (c, "reversal") if c >= 3 => "triple-reversal",
        (_, "continuation") => "continuation",
        _ if doji => "doji",
        _ => "",
    }
}

fn mentioned_patterns(text: &str, except: &str) -> Vec<String> {
    KNOWN_PATTERNS
        .iter()
        .filter(|p| text.contains(*p))
        .map(|p| format!("{}{}", EntityKind::Pattern.prefix(), slugify(p)))
        .filter(|id| id != except)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Candlestick patterns: headings naming a known pattern or the word
/// "pattern".
pub struct PatternDetector;

impl EntityDetector for PatternDetector {
    fn name(&self) -> &'static str {
        "patterns"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let doc = ctx.doc;
        let mut found = Vec::new();

        for (i, start, end) in entity_headings(doc) {
            let title = &doc.headings[i].title;
            let name = PAREN_SUFFIX_RE
                .captures(title)
                .and_then(|c| c.get(1))
                .map_or(title.as_str(), |m| m.as_str())
                .trim();
            let lower = name.to_lowercase();

            let known = KNOWN_PATTERNS
                .iter()
                .any(|p| lower.contains(p) || p.contains(lower.as_str()));
            if !known && !lower.contains("pattern") {
                continue;
            }

            let text = doc.text(start, end);
            let hints = truncate_chars(&text, HINT_WINDOW_CHARS);
            let hints_lower = hints.to_lowercase();

            let alias = PAREN_ALIAS_RE
                .captures(&hints)
                .or_else(|| JAPANESE_RE.captures(&hints))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());

            let kind = pattern_type(&hints_lower);
            let candles = candle_count(&lower);

            let mut detection =
                Detection::new(EntityKind::Pattern, name, start, end)
                    .attr("signal", signal(&hints_lower))
                    .attr("pattern_type", kind)
                    .attr("candle_count", candles.to_string())
                    .attr("reliability", reliability(&text.to_lowercase()))
                    .attr(
                        "pattern_category",
                        pattern_category(&lower, candles, kind),
                    );
            detection.alias = alias;
            detection.description = description_after(doc, i, end);
            let own_id =
                format!("{}{}", EntityKind::Pattern.prefix(), detection.slug);
            detection.see_also =
                mentioned_patterns(&text.to_lowercase(), &own_id);
            found.push(detection);
        }

        found
    }
}

/// Trading strategies: headings mentioning strategy vocabulary.
pub struct StrategyDetector;

impl EntityDetector for StrategyDetector {
    fn name(&self) -> &'static str {
        "strategies"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let doc = ctx.doc;
        let mut found = Vec::new();

        for (i, start, end) in entity_headings(doc) {
            let title = &doc.headings[i].title;
            if !STRATEGY_HINTS
                .iter()
                .any(|h| title.to_lowercase().contains(h))
            {
                continue;
            }

            let text = doc.text(start, end);
            let lower = text.to_lowercase();

            let indicators: Vec<_> = INDICATORS
                .iter()
                .copied()
                .filter(|ind| lower.contains(ind))
                .collect();
            let timeframes: BTreeSet<_> = TIMEFRAME_RE
                .find_iter(&text)
                .map(|m| m.as_str().to_lowercase())
                .collect();

            let mut detection =
                Detection::new(EntityKind::Strategy, title, start, end)
                    .attr("indicators", indicators.join(","))
                    .attr(
                        "timeframes",
                        timeframes.into_iter().collect::<Vec<_>>().join(","),
                    );
            detection.description = description_after(doc, i, end);
            detection.see_also = mentioned_patterns(&lower, "");
            found.push(detection);
        }

        found
    }
}

fn is_contract_name(name: &str) -> bool {
    name.chars().count() >= 2
        && name.chars().next().is_some_and(char::is_uppercase)
        && !SOLIDITY_KEYWORDS.contains(&name.to_lowercase().as_str())
}

/// Normalised `ERC-<n>` references in `text`, sorted and deduplicated.
pub fn standards(text: &str) -> Vec<String> {
    STANDARD_RE
        .captures_iter(text)
        .map(|c| format!("ERC-{}", &c[1]))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn fence_body<'a>(doc: &'a ScannedDoc<'a>, fence: &Fence) -> String {
    doc.lines[fence.open_line + 1..fence.close_line]
        .iter()
        .map(|l| l.text.as_ref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Solidity contracts, interfaces and libraries declared in code fences.
pub struct ContractDetector;

impl EntityDetector for ContractDetector {
    fn name(&self) -> &'static str {
        "contracts"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let doc = ctx.doc;
        let mut found = Vec::new();

        for fence in &doc.fences {
            if !matches!(fence.language.as_str(), "solidity" | "sol") {
                continue;
            }
            let code = fence_body(doc, fence);
            let tags = standards(&code);
            let imports: Vec<_> = IMPORT_RE
                .captures_iter(&code)
                .map(|c| c[1].to_string())
                .collect();
            let file_path = doc.lines
                [fence.open_line.saturating_sub(3)..fence.open_line]
                .iter()
                .find_map(|l| {
                    FILE_ANNOTATION_RE
                        .captures(l.text.trim())
                        .map(|c| c[1].to_string())
                });

            for caps in CONTRACT_RE.captures_iter(&code) {
                let name = &caps[2];
                if !is_contract_name(name) {
                    continue;
                }
                let mut detection = Detection::new(
                    EntityKind::Contract,
                    name,
                    fence.offset,
                    fence.end,
                )
                .attr("declaration", &caps[1])
                .attr("language", fence.language.as_str())
                .attr("imports", imports.join(","))
                .attr("file_path", file_path.clone().unwrap_or_default());
                detection.description = truncate_chars(
                    &preceding_text(doc, fence.open_line),
                    DESCRIPTION_MAX_CHARS,
                );
                detection.tags = tags.clone();
                detection.first_wins = true;
                found.push(detection);
            }
        }

        found
    }
}

/// Nearest non-empty, non-heading, non-fence line above `line`.
fn preceding_text(doc: &ScannedDoc<'_>, line: usize) -> String {
    doc.lines[..line]
        .iter()
        .rev()
        .map(|l| l.text.trim())
        .take_while(|t| !t.starts_with('#'))
        .find(|t| !t.is_empty() && !t.starts_with("```"))
        .unwrap_or_default()
        .to_string()
}

/// Pine Script functions: `## ns.name(` style headings plus namespaced
/// built-in calls seen in Pine code fences.
pub struct FunctionDetector;

impl EntityDetector for FunctionDetector {
    fn name(&self) -> &'static str {
        "functions"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let doc = ctx.doc;
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();

        for (i, start, end) in entity_headings(doc) {
            let Some(caps) = FUNCTION_HEADING_RE.captures(&doc.headings[i].title)
            else {
                continue;
            };
            let name = &caps[1];
            if PINE_RESERVED.contains(&name) {
                continue;
            }

            let text = doc.text(start, end);
            let signature = SIGNATURE_RE
                .find(&text)
                .map_or_else(|| format!("{name}()"), |m| m.as_str().trim().to_string());
            let namespace = name.split_once('.').map_or("", |(ns, _)| ns);

            let mut detection =
                Detection::new(EntityKind::Function, name, start, end)
                    .attr("namespace", namespace);
            detection.slug = name.to_lowercase();
            detection.alias = Some(signature);
            detection.description = description_after(doc, i, end);
            seen.insert(detection.slug.clone());
            found.push(detection);
        }

        for fence in &doc.fences {
            if !matches!(fence.language.as_str(), "pine" | "pinescript" | "") {
                continue;
            }
            let code = fence_body(doc, fence);
            for caps in INLINE_CALL_RE.captures_iter(&code) {
                let name = &caps[1];
                let Some((namespace, _)) = name.split_once('.') else {
                    continue;
                };
                if !PINE_NAMESPACES.contains(&namespace)
                    || !seen.insert(name.to_lowercase())
                {
                    continue;
                }
                let mut detection = Detection::new(
                    EntityKind::Function,
                    name,
                    fence.offset,
                    fence.end,
                )
                .attr("namespace", namespace)
                .attr("origin", "inline");
                detection.slug = name.to_lowercase();
                detection.alias = Some(format!("{name}()"));
                detection.description =
                    format!("Pine Script built-in: {name}");
                detection.first_wins = true;
                found.push(detection);
            }
        }

        found
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScriptMeta {
    id: Option<serde_yaml::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, rename = "type")]
    script_type: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    boosts: u64,
    #[serde(default)]
    views: u64,
    #[serde(default)]
    has_source: Option<bool>,
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    let text = match value {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Community scripts described by YAML frontmatter with a required `id`.
pub struct FrontmatterDetector;

impl EntityDetector for FrontmatterDetector {
    fn name(&self) -> &'static str {
        "scripts"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let doc = ctx.doc;
        let Some(fm) = doc.frontmatter else {
            return Vec::new();
        };

        let yaml = doc.text(fm.content.0, fm.content.1);
        let meta: ScriptMeta = match serde_yaml::from_str(&yaml) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(
                    file = ctx.source_file,
                    error = %e,
                    "Skipping unparseable frontmatter"
                );
                return Vec::new();
            }
        };
        let Some(id) = meta.id.as_ref().and_then(scalar) else {
            return Vec::new();
        };

        let title = meta.title.clone().unwrap_or_default();
        let name = if title.is_empty() { id.clone() } else { title.clone() };

        let section = |wanted: &str| {
            doc.headings
                .iter()
                .position(|h| h.title.eq_ignore_ascii_case(wanted))
        };
        let description = section("description")
            .map(|i| first_paragraph(&doc.lines, doc.headings[i].line + 1))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| truncate_chars(&title, SUMMARY_MAX_CHARS));

        let mut detection = Detection::new(
            EntityKind::Script,
            &name,
            fm.body_start,
            doc.len(),
        )
        .attr("script_id", id.as_str())
        .attr("author", meta.author.unwrap_or_default().trim())
        .attr(
            "script_type",
            meta.script_type.unwrap_or_else(|| "indicator".to_string()),
        )
        .attr("views", meta.views.to_string())
        .attr("has_source", meta.has_source.unwrap_or(true).to_string());

        if let Some(i) = section("source code") {
            let start = doc.headings[i].offset;
            let end = doc.section_end(i);
            detection = detection
                .attr("source_offset", start.to_string())
                .attr("source_length", (end - start).to_string());
        }

        detection.slug = slugify(&id);
        detection.description = collapse_whitespace(&description);
        detection.tags = meta
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        detection.popularity = meta.boosts;
        vec![detection]
    }
}

fn route_group(path: &str) -> &'static str {
    if path.contains("(dashboard)/admin") {
        "(dashboard)/admin"
    } else if path.contains("(dashboard)") {
        "(dashboard)"
    } else if path.contains("(landing)") {
        "(landing)"
    } else {
        ""
    }
}

fn component_type(path: &str) -> &'static str {
    let app = path.starts_with("app/") || path.contains("/app/");
    if path.contains("/hooks/") || path.starts_with("hooks/") {
        "hook"
    } else if path.contains("/lib/") || path.starts_with("lib/") {
        "lib"
    } else if path.ends_with(".css") {
        "style"
    } else if app && path.ends_with("page.tsx") {
        "page"
    } else if app && path.ends_with("layout.tsx") {
        "layout"
    } else {
        "component"
    }
}

/// Frontend templates: every non-markdown source file is one entity
/// spanning the whole file.
pub struct TemplateDetector;

impl EntityDetector for TemplateDetector {
    fn name(&self) -> &'static str {
        "templates"
    }

    fn detect(&self, ctx: &DocContext<'_>) -> Vec<Detection> {
        let path = ctx.source_file;
        let (stem_path, extension) =
            path.rsplit_once('.').unwrap_or((path, ""));
        if MARKDOWN_EXTENSIONS.contains(&extension.to_lowercase().as_str()) {
            return Vec::new();
        }

        let mut segments: Vec<&str> = stem_path.split('/').collect();
        let stem = segments.pop().unwrap_or(stem_path);
        let name = match (stem, segments.last()) {
            ("page" | "layout", Some(parent)) if *parent != "app" => {
                format!("{parent}/{stem}")
            }
            _ => stem.to_string(),
        };

        let doc = ctx.doc;
        let text = doc.text(0, doc.len());
        let exports: Vec<_> = EXPORT_RE
            .captures_iter(&text)
            .map(|c| c[1].to_string())
            .collect();
        let imports: Vec<_> = IMPORT_FROM_RE
            .captures_iter(&text)
            .map(|c| c[1].to_string())
            .collect();

        let mut detection =
            Detection::new(EntityKind::Template, &name, 0, doc.len())
                .attr("component_type", component_type(path))
                .attr("route_group", route_group(path))
                .attr("exports", exports.join(","))
                .attr("imports", imports.join(","));
        detection.slug = stem_path
            .split('/')
            .map(slugify)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        detection.description = if exports.is_empty() {
            format!("{} template", component_type(path))
        } else {
            format!("{} exporting {}", component_type(path), exports.join(", "))
        };
        vec![detection]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::scan;

    fn detect(detector: &dyn EntityDetector, text: &str) -> Vec<Detection> {
        detect_at(detector, "doc.md", text)
    }

    fn detect_at(
        detector: &dyn EntityDetector,
        path: &str,
        text: &str,
    ) -> Vec<Detection> {
        let doc = scan(text.as_bytes());
        detector.detect(&DocContext {
            source_file: path,
            doc: &doc,
        })
    }

    const CANDLES: &str = "# Single Candles\n\n## Hammer (Takuri)\nA bullish reversal with a long lower shadow. High reliability.\nOften confused with the hanging man.\n\n## Shooting Star\nA bearish reversal after an uptrend.\n\n## Summary\nNo patterns here.\n";

    #[test]
    fn patterns_are_classified() {
        let found = detect(&PatternDetector, CANDLES);
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Hammer", "Shooting Star"]);

        let hammer = &found[0];
        assert_eq!(hammer.slug, "hammer");
        assert_eq!(hammer.alias.as_deref(), Some("Takuri"));
        assert_eq!(hammer.attributes["signal"], "bullish");
        assert_eq!(hammer.attributes["pattern_type"], "reversal");
        assert_eq!(hammer.attributes["candle_count"], "1");
        assert_eq!(hammer.attributes["reliability"], "high");
        assert_eq!(hammer.attributes["pattern_category"], "single-reversal");
        assert!(hammer.see_also.contains(&"pat/hanging-man".to_string()));
        assert!(!hammer.see_also.contains(&"pat/hammer".to_string()));
        assert!(hammer.description.starts_with("A bullish reversal"));

        let range = &CANDLES
            [hammer.byte_offset..hammer.byte_offset + hammer.byte_length];
        assert!(range.starts_with("## Hammer"));
        assert!(!range.contains("Shooting Star"));

        assert_eq!(found[1].attributes["signal"], "bearish");
    }

    #[test]
    fn strategies_collect_indicators_and_patterns() {
        let text = "## Pin Bar Entry Strategy\nTrade the hammer at support on the daily chart with RSI below 30 on 4h.\n";
        let found = detect(&StrategyDetector, text);
        assert_eq!(found.len(), 1);
        let s = &found[0];
        assert_eq!(s.slug, "pin-bar-entry-strategy");
        assert_eq!(s.attributes["indicators"], "rsi");
        assert_eq!(s.attributes["timeframes"], "4h,daily");
        assert_eq!(s.see_also, vec!["pat/hammer", "pat/pin-bar"]);
    }

    #[test]
    fn contracts_from_solidity_fences() {
        let text = "## Token\nFile: `src/Token.sol`\nThe main token.\n```solidity\nimport \"./IERC721.sol\";\ncontract Token is ERC721 {\n  // see EIP-2981\n}\ninterface ID {}\n```\n```js\ncontract Nope {}\n```\n";
        let found = detect(&ContractDetector, text);
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.name, "Token");
        assert_eq!(c.slug, "token");
        assert_eq!(c.tags, vec!["ERC-2981", "ERC-721"]);
        assert_eq!(c.attributes["imports"], "./IERC721.sol");
        assert_eq!(c.attributes["file_path"], "src/Token.sol");
        assert_eq!(c.attributes["declaration"], "contract");
        assert_eq!(c.description, "The main token.");
        assert!(c.first_wins);
        assert!(text[c.byte_offset..].starts_with("```solidity"));
    }

    #[test]
    fn standards_are_normalised() {
        assert_eq!(
            standards("erc721, ERC-20 and EIP2981 or EIP-20, not IERC721"),
            vec!["ERC-20", "ERC-2981", "ERC-721"]
        );
    }

    #[test]
    fn functions_from_headings_and_inline_calls() {
        let text = "## ta.sma()\nSimple moving average.\n\nta.sma(source, length) → series float\n\n## overview\nNot a function.\n\n```pine\nx = ta.ema(close, 9)\ny = ta.sma(close, 9)\nz = foo.bar(1)\n```\n";
        let found = detect(&FunctionDetector, text);
        let slugs: Vec<_> = found.iter().map(|d| d.slug.as_str()).collect();
        assert_eq!(slugs, vec!["ta.sma", "ta.ema"]);

        let sma = &found[0];
        assert_eq!(sma.attributes["namespace"], "ta");
        assert_eq!(
            sma.alias.as_deref(),
            Some("ta.sma(source, length) → series float")
        );
        assert_eq!(sma.description, "Simple moving average. ta.sma(source, length) → series float");

        let ema = &found[1];
        assert_eq!(ema.attributes["origin"], "inline");
        assert!(ema.first_wins);
    }

    #[test]
    fn scripts_from_frontmatter() {
        let text = "---\nid: 42\ntitle: Volume Profile\nauthor: Alice\ntags: [Volume, Profile]\nboosts: 120\n---\n# Volume Profile\n## Description\nShows volume by price.\n## Source Code\n```pine\n//@version=5\n```\n";
        let found = detect(&FrontmatterDetector, text);
        assert_eq!(found.len(), 1);
        let s = &found[0];
        assert_eq!(s.slug, "42");
        assert_eq!(s.name, "Volume Profile");
        assert_eq!(s.popularity, 120);
        assert_eq!(s.tags, vec!["volume", "profile"]);
        assert_eq!(s.attributes["author"], "Alice");
        assert_eq!(s.attributes["script_type"], "indicator");
        assert_eq!(s.description, "Shows volume by price.");
        assert!(text[s.byte_offset..].starts_with("# Volume Profile"));
        assert_eq!(s.byte_offset + s.byte_length, text.len());

        let src: usize = s.attributes["source_offset"].parse().unwrap();
        assert!(text[src..].starts_with("## Source Code"));
    }

    #[test]
    fn scripts_require_id() {
        let text = "---\ntitle: No id\n---\n# Body\n";
        assert!(detect(&FrontmatterDetector, text).is_empty());
        assert!(detect(&FrontmatterDetector, "# No frontmatter\n").is_empty());
        assert!(detect(&FrontmatterDetector, "---\n: [bad\n---\n").is_empty());
    }

    #[test]
    fn templates_span_whole_file() {
        let text = "import { useState } from \"react\";\nexport default function AdminPage() {\n  return null;\n}\n";
        let found =
            detect_at(&TemplateDetector, "app/(dashboard)/admin/page.tsx", text);
        assert_eq!(found.len(), 1);
        let t = &found[0];
        assert_eq!(t.name, "admin/page");
        assert_eq!(t.slug, "app/dashboard/admin/page");
        assert_eq!(t.attributes["component_type"], "page");
        assert_eq!(t.attributes["route_group"], "(dashboard)/admin");
        assert_eq!(t.attributes["exports"], "AdminPage");
        assert_eq!(t.attributes["imports"], "react");
        assert_eq!((t.byte_offset, t.byte_length), (0, text.len()));
    }

    #[test]
    fn templates_skip_markdown() {
        assert!(detect_at(&TemplateDetector, "guide.md", "# Guide\n").is_empty());
        let css = detect_at(&TemplateDetector, "styles/globals.css", "body {}\n");
        assert_eq!(css[0].attributes["component_type"], "style");
        assert!(!css[0].attributes.contains_key("route_group"));
    }
}
