use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docslice::{
    Profile,
    batch::DEFAULT_WORKERS,
    schema::EntityKind,
    searcher::{Category, DEFAULT_LIMIT, DEFAULT_SUGGESTIONS},
};

#[derive(Debug, Parser)]
#[command(
    name = "docslice",
    about = "Byte-offset documentation index with targeted extraction",
    version
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory of source documents (default: <data-dir>/raw)
    #[arg(long, global = true, env = "DOCSLICE_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Indexing profile for the documentation domain
    #[arg(
        long,
        global = true,
        value_enum,
        env = "DOCSLICE_PROFILE",
        default_value_t = Profile::Generic
    )]
    pub profile: Profile,

    /// Include glob for source files (repeatable; default per profile)
    #[arg(long = "include", global = true)]
    pub includes: Vec<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the index from source documents
    BuildIndex,
    /// Check whether the index matches the source documents
    CheckIndex,
    /// Fuzzy search across indexed entries
    Search(SearchArgs),
    /// Extract any entry by id
    Extract(ExtractArgs),
    /// Extract a documentation section
    GetSection(ExtractArgs),
    /// Extract an entity by kind and name
    Get(GetArgs),
    /// List every entry in a category
    List(ListArgs),
    /// List entities of a kind, optionally filtered by attribute
    ListEntities(ListEntitiesArgs),
    /// Count entities per attribute value
    Facets(FacetsArgs),
    /// Find entities of a kind by one attribute value
    Find(FindArgs),
    /// List every tag with its entity count
    Tags,
    /// Find entities carrying a tag (e.g. an ERC standard)
    Tagged(TaggedArgs),
    /// List every author with their entity count
    Authors,
    /// Extract the code examples of a section
    Examples(ExamplesArgs),
    /// Suggest ids close to a possibly misspelled one
    Suggest(SuggestArgs),
    /// Extract many entries in parallel
    Batch(BatchArgs),
    /// Show index status and statistics
    Status,
    /// Show cumulative token savings
    TokenReport,
    /// Start MCP server for AI agent integration
    Serve,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

impl Command {
    /// Name echoed in every JSON response.
    pub fn name(&self) -> &'static str {
        match self {
            Command::BuildIndex => "build-index",
            Command::CheckIndex => "check-index",
            Command::Search(_) => "search",
            Command::Extract(_) => "extract",
            Command::GetSection(_) => "get-section",
            Command::Get(_) => "get",
            Command::List(_) => "list",
            Command::ListEntities(_) => "list-entities",
            Command::Facets(_) => "facets",
            Command::Find(_) => "find",
            Command::Tags => "tags",
            Command::Tagged(_) => "tagged",
            Command::Authors => "authors",
            Command::Examples(_) => "examples",
            Command::Suggest(_) => "suggest",
            Command::Batch(_) => "batch",
            Command::Status => "status",
            Command::TokenReport => "token-report",
            Command::Serve => "serve",
            Command::Completions(_) => "completions",
        }
    }
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Restrict to one category (sections, examples, patterns, ...)
    #[arg(short = 'c', long)]
    pub category: Option<Category>,

    /// Maximum number of results
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,
}

// -- Extraction --

#[derive(Debug, Parser)]
pub struct ExtractArgs {
    /// Entry id (exact, prefixed or approximate)
    pub id: String,

    /// Return only headings, fence markers and declarations
    #[arg(long)]
    pub outline: bool,
}

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Entity kind (pattern, strategy, contract, function, script, template)
    pub kind: EntityKind,

    /// Entity name or id
    pub name: String,

    /// Return only headings, fence markers and declarations
    #[arg(long)]
    pub outline: bool,
}

#[derive(Debug, Parser)]
pub struct ExamplesArgs {
    /// Section id or part of one
    pub topic: String,
}

#[derive(Debug, Parser)]
pub struct BatchArgs {
    /// Entry ids to extract
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Return only headings, fence markers and declarations
    #[arg(long)]
    pub outline: bool,
}

// -- Listings --

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Category to list (sections, examples, patterns, ...)
    pub category: Category,

    /// Only sections whose document category matches (sections only)
    #[arg(short = 'd', long)]
    pub doc_category: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ListEntitiesArgs {
    /// Entity kind
    pub kind: EntityKind,

    /// Attribute filter as key=value (repeatable)
    #[arg(short = 'f', long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,
}

#[derive(Debug, Parser)]
pub struct FacetsArgs {
    /// Entity kind
    pub kind: EntityKind,

    /// Attribute to group by (e.g. signal, pattern_type, namespace)
    pub attribute: String,
}

#[derive(Debug, Parser)]
pub struct FindArgs {
    /// Entity kind
    pub kind: EntityKind,

    /// Attribute to match
    pub attribute: String,

    /// Exact attribute value
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct TaggedArgs {
    /// Tag to look up (case-insensitive)
    pub tag: String,

    /// Restrict to one entity kind
    #[arg(short = 'k', long)]
    pub kind: Option<EntityKind>,
}

#[derive(Debug, Parser)]
pub struct SuggestArgs {
    /// Possibly misspelled id or name
    pub query: String,

    /// Number of suggestions
    #[arg(short = 'n', long, default_value_t = DEFAULT_SUGGESTIONS)]
    pub count: usize,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty filter key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docslice",
            &mut std::io::stdout(),
        );
    }
}
