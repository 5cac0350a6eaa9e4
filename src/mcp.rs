use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    batch::{self, BatchOutcome, DEFAULT_WORKERS},
    engine::Engine,
    error::{self, Error},
    extractor::Extraction,
    schema::EntityKind,
    searcher::{Category, DEFAULT_LIMIT, DEFAULT_SUGGESTIONS, SearchHit},
};

#[derive(Clone)]
pub struct DocsliceMcpServer {
    engine: Arc<Mutex<Engine>>,
    tool_router: ToolRouter<Self>,
}

impl DocsliceMcpServer {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            tool_router: Self::tool_router(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Engine>, rmcp::ErrorData> {
        self.engine
            .lock()
            .map_err(|_| rmcp::ErrorData::internal_error("engine lock poisoned", None))
    }

    /// Run one extraction and account for it, or report the failure.
    fn extraction_tool(
        &self,
        op: &str,
        run: impl FnOnce(&mut Engine) -> error::Result<Extraction>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let mut engine = self.lock()?;
        match run(&mut engine) {
            Ok(extraction) => {
                engine.record_extraction(op, &extraction);
                let text = extraction.content.clone();
                Ok(success(text, to_structured(&extraction)?))
            }
            Err(e) => Ok(failure(&mut engine, &e)),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocsliceMcpServer {
    #[tool(
        name = "docslice_search",
        description = "Fuzzy search over sections, entities and code examples. Returns ids to pass to the extraction tools."
    )]
    pub async fn docslice_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let category = match params.category.as_deref().map(str::parse::<Category>) {
            None => None,
            Some(Ok(category)) => Some(category),
            Some(Err(e)) => return Ok(failure(&mut engine, &Error::Config(e))),
        };
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

        let hits = match engine.searcher() {
            Ok(searcher) => searcher.search(&params.query, category, limit),
            Err(e) => return Ok(failure(&mut engine, &e)),
        };
        let summary = format_search_summary(&hits, &params.query);
        let structured = json!({
            "query": params.query,
            "count": hits.len(),
            "hits": hits,
        });
        engine.record_response("search", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_get_section",
        description = "Extract one documentation section by id, reading only its byte range."
    )]
    pub async fn docslice_get_section(
        &self,
        params: Parameters<ExtractParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let outline = params.outline.unwrap_or(false);
        self.extraction_tool("get-section", |engine| {
            engine.extractor()?.get_section(&params.id, outline)
        })
    }

    #[tool(
        name = "docslice_get",
        description = "Extract an entity (pattern, strategy, contract, function, script, template) by kind and name."
    )]
    pub async fn docslice_get(
        &self,
        params: Parameters<GetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let outline = params.outline.unwrap_or(false);
        self.extraction_tool("get", |engine| {
            let kind = parse_kind(&params.kind)?;
            engine.extractor()?.get_entity(kind, &params.name, outline)
        })
    }

    #[tool(
        name = "docslice_extract",
        description = "Extract any indexed entry by id. Approximate ids resolve to the closest entry."
    )]
    pub async fn docslice_extract(
        &self,
        params: Parameters<ExtractParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let outline = params.outline.unwrap_or(false);
        self.extraction_tool("extract", |engine| {
            engine.extractor()?.extract(&params.id, outline)
        })
    }

    #[tool(
        name = "docslice_batch_extract",
        description = "Extract several entries in parallel. Each id succeeds or fails independently."
    )]
    pub async fn docslice_batch_extract(
        &self,
        params: Parameters<BatchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let outline = params.outline.unwrap_or(false);
        let workers = params.workers.unwrap_or(DEFAULT_WORKERS);
        let mut engine = self.lock()?;

        let outcomes = match engine.extractor() {
            Ok(extractor) => {
                batch::run(&params.ids, workers, |id| extractor.extract(id, outline))
            }
            Err(e) => Err(e),
        };
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        for outcome in &outcomes {
            if let BatchOutcome::Ok { result, .. } = outcome {
                engine.record_extraction("batch", result);
            }
        }
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        let summary = format!(
            "Extracted {} of {} entries",
            outcomes.len() - failed,
            outcomes.len()
        );
        let structured = json!({
            "total": outcomes.len(),
            "failed": failed,
            "results": outcomes,
        });

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_list",
        description = "List every entry in a category (sections, examples, patterns, strategies, contracts, functions, scripts, templates)."
    )]
    pub async fn docslice_list(
        &self,
        params: Parameters<ListParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let listed = params
            .category
            .parse::<Category>()
            .map_err(Error::Config)
            .and_then(|category| {
                engine.list(category, params.doc_category.as_deref())
            });
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = format!("{} entries in {}", listed.len(), params.category);
        let structured = json!({
            "category": params.category,
            "count": listed.len(),
            "entries": listed,
        });
        engine.record_response("list", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_list_entities",
        description = "List entities of one kind, optionally filtered by exact attribute values."
    )]
    pub async fn docslice_list_entities(
        &self,
        params: Parameters<ListEntitiesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let filters: Vec<(String, String)> =
            params.filters.unwrap_or_default().into_iter().collect();
        let mut engine = self.lock()?;

        let entities = parse_kind(&params.kind).and_then(|kind| {
            let extractor = engine.extractor()?;
            let entities = extractor.list_entities(kind, &filters);
            Ok(serde_json::to_value(entities)?)
        });
        let entities = match entities {
            Ok(entities) => entities,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let count = entities.as_array().map_or(0, Vec::len);
        let summary = format!("{count} {} matched", params.kind);
        let structured = json!({
            "kind": params.kind,
            "count": count,
            "entities": entities,
        });
        engine.record_response("list-entities", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_facets",
        description = "Count entities of one kind per value of an attribute."
    )]
    pub async fn docslice_facets(
        &self,
        params: Parameters<FacetsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let facets = parse_kind(&params.kind).and_then(|kind| {
            Ok(engine.searcher()?.facet_counts(kind, &params.attribute))
        });
        let facets = match facets {
            Ok(facets) => facets,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = facets
            .iter()
            .map(|f| format!("{}: {}", f.value, f.count))
            .collect::<Vec<_>>()
            .join("\n");
        let structured = json!({
            "kind": params.kind,
            "attribute": params.attribute,
            "facets": facets,
        });

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_find_by_attribute",
        description = "Find entities of one kind whose attribute equals a value, e.g. patterns with signal=bullish."
    )]
    pub async fn docslice_find_by_attribute(
        &self,
        params: Parameters<FindParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let found = parse_kind(&params.kind).and_then(|kind| {
            let searcher = engine.searcher()?;
            let found = searcher.find_by_attribute(kind, &params.attribute, &params.value);
            Ok(serde_json::to_value(found)?)
        });
        let found = match found {
            Ok(found) => found,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = entity_summary(&found);
        let structured = json!({
            "kind": params.kind,
            "attribute": params.attribute,
            "value": params.value,
            "entities": found,
        });
        engine.record_response("find", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_list_tags",
        description = "List every tag (ERC standards, script tags, ...) with its entity count."
    )]
    pub async fn docslice_list_tags(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let mut engine = self.lock()?;
        let tags = match engine.searcher() {
            Ok(searcher) => searcher.list_tags(),
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = tags
            .iter()
            .map(|t| format!("{}: {}", t.value, t.count))
            .collect::<Vec<_>>()
            .join("\n");
        let structured = json!({ "count": tags.len(), "tags": tags });
        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_find_by_tag",
        description = "Find entities carrying a tag, optionally restricted to one kind."
    )]
    pub async fn docslice_find_by_tag(
        &self,
        params: Parameters<TagParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let kind = match params.kind.as_deref().map(parse_kind).transpose() {
            Ok(kind) => kind,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };
        let found = engine
            .searcher()
            .and_then(|searcher| Ok(serde_json::to_value(searcher.find_by_tag(&params.tag, kind))?));
        let found = match found {
            Ok(found) => found,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = entity_summary(&found);
        let structured = json!({ "tag": params.tag, "entities": found });
        engine.record_response("tagged", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_list_authors",
        description = "List every author with the number of entities attributed to them."
    )]
    pub async fn docslice_list_authors(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let mut engine = self.lock()?;
        let authors = match engine.searcher() {
            Ok(searcher) => searcher.list_authors(),
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = authors
            .iter()
            .map(|a| format!("{}: {}", a.value, a.count))
            .collect::<Vec<_>>()
            .join("\n");
        let structured = json!({ "count": authors.len(), "authors": authors });
        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_code_examples",
        description = "Extract the fenced code examples belonging to a section."
    )]
    pub async fn docslice_code_examples(
        &self,
        params: Parameters<ExamplesParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let mut engine = self.lock()?;

        let examples = match engine
            .extractor()
            .and_then(|x| x.examples_for_section(&params.topic))
        {
            Ok(examples) => examples,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = examples
            .iter()
            .map(|x| x.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let structured = json!({
            "topic": params.topic,
            "count": examples.len(),
            "examples": examples,
        });
        engine.record_response("examples", &structured);

        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_suggest",
        description = "Suggest indexed ids close to a possibly misspelled id or name."
    )]
    pub async fn docslice_suggest(
        &self,
        params: Parameters<SuggestParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let count = params.count.unwrap_or(DEFAULT_SUGGESTIONS);
        let mut engine = self.lock()?;

        let suggestions = match engine.searcher() {
            Ok(searcher) => searcher.suggest(&params.query, count),
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let summary = suggestions.join("\n");
        let structured = json!({
            "query": params.query,
            "suggestions": suggestions,
        });
        Ok(success(summary, structured))
    }

    #[tool(
        name = "docslice_index_status",
        description = "Report index location, freshness and entry counts."
    )]
    pub async fn docslice_index_status(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let mut engine = self.lock()?;
        let status = match engine.status() {
            Ok(status) => status,
            Err(e) => return Ok(failure(&mut engine, &e)),
        };

        let stats = &status.stats;
        let summary = format!(
            "{} sections, {} entities, {} examples ({} files)",
            stats.total_sections,
            stats.total_entities,
            stats.total_examples,
            stats.total_files
        );
        Ok(success(summary, to_structured(&status)?))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsliceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docslice", env!("CARGO_PKG_VERSION"))
                    .with_title("docslice MCP"),
            )
            .with_instructions(
                "Use docslice_search to find ids, then docslice_get, docslice_get_section or docslice_extract to read only the matching byte range. Pass outline=true for structure only.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Restrict to sections, examples, or an entity kind such as patterns.
    pub category: Option<String>,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractParams {
    /// Entry id, e.g. "patterns/hammer" or "pat/hammer".
    pub id: String,
    /// Return only headings, fence markers and declarations.
    pub outline: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetParams {
    /// Entity kind: pattern, strategy, contract, function, script or template.
    pub kind: String,
    /// Entity name or id.
    pub name: String,
    /// Return only headings, fence markers and declarations.
    pub outline: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchParams {
    /// Entry ids to extract.
    pub ids: Vec<String>,
    /// Parallel workers (default: 3).
    pub workers: Option<usize>,
    /// Return only headings, fence markers and declarations.
    pub outline: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// Category to list.
    pub category: String,
    /// Only sections from documents of this category.
    pub doc_category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindParams {
    /// Entity kind.
    pub kind: String,
    /// Attribute to match.
    pub attribute: String,
    /// Exact attribute value.
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagParams {
    /// Tag to look up, case-insensitive.
    pub tag: String,
    /// Restrict to one entity kind.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListEntitiesParams {
    /// Entity kind.
    pub kind: String,
    /// Attribute filters; every pair must match exactly.
    pub filters: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetsParams {
    /// Entity kind.
    pub kind: String,
    /// Attribute to group by.
    pub attribute: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExamplesParams {
    /// Section id or part of one.
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuggestParams {
    /// Possibly misspelled id or name.
    pub query: String,
    /// Number of suggestions (default: 5).
    pub count: Option<usize>,
}

fn parse_kind(raw: &str) -> error::Result<EntityKind> {
    raw.parse::<EntityKind>().map_err(Error::Config)
}

/// One `id name` line per serialized entity.
fn entity_summary(entities: &Value) -> String {
    let Some(entities) = entities.as_array() else {
        return String::new();
    };
    if entities.is_empty() {
        return "No matching entities".to_string();
    }
    entities
        .iter()
        .map(|e| {
            format!(
                "{} {}",
                e["id"].as_str().unwrap_or_default(),
                e["name"].as_str().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_search_summary(hits: &[SearchHit], query: &str) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!("Found {} result{} for \"{query}\":", hits.len(), suffix));

    for hit in hits {
        lines.push(format!("{} {:.3} {}", hit.id, hit.score, hit.source_file));
    }

    lines.join("\n")
}

fn success(summary: String, structured: Value) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    result
}

/// A domain failure reported to the caller, with suggestions for unknown ids.
fn failure(engine: &mut Engine, error: &Error) -> CallToolResult {
    let suggestions = engine.suggestions_for(error);
    let mut text = error.to_string();
    if !suggestions.is_empty() {
        text.push_str(&format!("\nDid you mean: {}", suggestions.join(", ")));
    }
    let mut result = CallToolResult::error(vec![Content::text(text)]);
    result.structured_content = Some(json!({
        "error": error.to_string(),
        "suggestions": suggestions,
    }));
    result
}

fn to_structured(value: &impl Serialize) -> Result<Value, rmcp::ErrorData> {
    serde_json::to_value(value)
        .map_err(|e| mcp_error("failed to serialize tool result", e))
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(engine: Engine) -> error::Result<()> {
    let server = DocsliceMcpServer::new(engine);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
