//! Per-domain indexing profiles.
//!
//! A profile decides how a document path maps to a category, which entity
//! detectors run, which code lines survive outlining, and which extra
//! phrases count as section keywords.

use std::{fmt, path::Path, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    detect::{
        ContractDetector,
        EntityDetector,
        FrontmatterDetector,
        FunctionDetector,
        KNOWN_PATTERNS,
        PatternDetector,
        StrategyDetector,
        TemplateDetector,
    },
    entry_id::slugify,
    text_util::static_regex,
};

/// Category used when no mapping rule applies.
pub const FALLBACK_CATEGORY: &str = "general";

/// Ordered stem-substring table for candlestick documentation. The first
/// entry contained in the file stem wins.
const CANDLESTICK_CATEGORIES: &[(&str, &str)] = &[
    ("fundamentals", "fundamentals"),
    ("history", "history"),
    ("single-reversal", "patterns"),
    ("single-doji", "patterns"),
    ("dual-reversal", "patterns"),
    ("triple-reversal", "patterns"),
    ("continuation", "patterns"),
    ("convergence-trend", "convergence"),
    ("convergence-levels", "convergence"),
    ("convergence-ma", "convergence"),
    ("convergence-oscillators", "convergence"),
    ("convergence-volume", "convergence"),
    ("strategies-pin-bar", "strategies"),
    ("strategies-engulfing", "strategies"),
    ("strategies-inside-bar", "strategies"),
    ("market-structure", "strategies"),
    ("money-management", "strategies"),
    ("psychology", "fundamentals"),
    ("measured-moves", "convergence"),
    ("glossary", "glossary"),
    ("pattern-index", "patterns"),
    ("nison", "patterns"),
    ("bible", "strategies"),
    ("web", "patterns"),
];

/// Path keyword table for Pine Script manuals.
const PINE_CATEGORIES: &[(&[&str], &str)] = &[
    (&["primer"], "primer"),
    (&["language"], "language"),
    (&["concepts"], "concepts"),
    (&["visuals"], "visuals"),
    (&["writing"], "writing"),
    (&["faq"], "faq"),
    (&["error", "migration", "release"], "reference"),
];

static SOLIDITY_DECLARATIONS: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(
        r"^\s*(?:abstract\s+)?(?:contract|interface|library|function|event|modifier|struct|enum|constructor)\b",
    )
});

static PINE_DECLARATIONS: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(
        r"^\s*(?://@version|(?:indicator|strategy|library)\s*\(|type\s+\w+|(?:export\s+)?(?:method\s+)?[A-Za-z_][\w.]*\s*\([^)]*\)\s*=>)",
    )
});

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Plain markdown: sections and examples only.
    #[default]
    Generic,
    /// Candlestick pattern and trading strategy references.
    Candlestick,
    /// Smart-contract guides with Solidity code.
    Solidity,
    /// Pine Script language manuals.
    Pine,
    /// Community scripts described by YAML frontmatter.
    Scripts,
    /// Frontend template sources alongside their markdown guides.
    Templates,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Generic => "generic",
            Profile::Candlestick => "candlestick",
            Profile::Solidity => "solidity",
            Profile::Pine => "pine",
            Profile::Scripts => "scripts",
            Profile::Templates => "templates",
        }
    }

    /// Include globs used when none are configured.
    pub fn default_includes(self) -> Vec<String> {
        let patterns: &[&str] = match self {
            Profile::Templates => {
                &["*.md", "*.tsx", "*.ts", "*.jsx", "*.js", "*.css"]
            }
            _ => &["*.md"],
        };
        patterns.iter().map(|p| p.to_string()).collect()
    }

    /// Category for a document at `relative_path`.
    pub fn category(self, relative_path: &str) -> String {
        let stem = Path::new(relative_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(relative_path)
            .to_lowercase();

        match self {
            Profile::Candlestick => CANDLESTICK_CATEGORIES
                .iter()
                .find(|(needle, _)| stem.contains(*needle))
                .map_or(FALLBACK_CATEGORY, |&(_, category)| category)
                .to_string(),
            Profile::Pine => {
                let path = relative_path.to_lowercase();
                PINE_CATEGORIES
                    .iter()
                    .find(|(needles, _)| needles.iter().any(|n| path.contains(*n)))
                    .map_or(FALLBACK_CATEGORY, |&(_, category)| category)
                    .to_string()
            }
            Profile::Generic
            | Profile::Solidity
            | Profile::Scripts
            | Profile::Templates => {
                let slug = slugify(&stem);
                if slug.is_empty() {
                    FALLBACK_CATEGORY.to_string()
                } else {
                    slug
                }
            }
        }
    }

    /// Entity detectors run for every document, in order.
    pub fn detectors(self) -> Vec<Box<dyn EntityDetector>> {
        match self {
            Profile::Generic => Vec::new(),
            Profile::Candlestick => {
                vec![Box::new(PatternDetector), Box::new(StrategyDetector)]
            }
            Profile::Solidity => vec![Box::new(ContractDetector)],
            Profile::Pine => vec![Box::new(FunctionDetector)],
            Profile::Scripts => vec![Box::new(FrontmatterDetector)],
            Profile::Templates => vec![Box::new(TemplateDetector)],
        }
    }

    /// Code lines kept inside fences when outlining.
    pub fn declarations(self) -> Option<&'static Regex> {
        match self {
            Profile::Solidity => Some(&*SOLIDITY_DECLARATIONS),
            Profile::Pine | Profile::Scripts => Some(&*PINE_DECLARATIONS),
            Profile::Generic | Profile::Candlestick | Profile::Templates => None,
        }
    }

    /// Phrases added to section keywords when present in the text.
    pub fn vocabulary(self) -> &'static [&'static str] {
        match self {
            Profile::Candlestick => KNOWN_PATTERNS,
            _ => &[],
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" => Ok(Profile::Generic),
            "candlestick" => Ok(Profile::Candlestick),
            "solidity" => Ok(Profile::Solidity),
            "pine" => Ok(Profile::Pine),
            "scripts" => Ok(Profile::Scripts),
            "templates" => Ok(Profile::Templates),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}
