use std::{io::Write, process::ExitCode};

use clap::Parser;
use docslice::{
    DataDir,
    Engine,
    EngineConfig,
    Error,
    Result,
    batch::{self, BatchOutcome},
    mcp,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSLICE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return ExitCode::SUCCESS;
    }

    let command = cli.command.name();
    let mut engine = match open_engine(&cli) {
        Ok(engine) => engine,
        Err(e) => return fail(command, &e, Vec::new()),
    };

    if let Command::Serve = cli.command {
        return match mcp::run_mcp(engine) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "MCP server failed");
                exit_code(&e)
            }
        };
    }

    match dispatch(&mut engine, &cli.command) {
        Ok(result) => {
            emit(&json!({
                "status": "ok",
                "command": command,
                "result": result,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            let suggestions = engine.suggestions_for(&e);
            fail(command, &e, suggestions)
        }
    }
}

fn open_engine(cli: &Cli) -> Result<Engine> {
    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = EngineConfig::from_data_dir(
        &data_dir,
        cli.source_dir.clone(),
        cli.profile,
        cli.includes.clone(),
    );
    Engine::new(config)
}

fn dispatch(engine: &mut Engine, command: &Command) -> Result<Value> {
    match command {
        Command::BuildIndex => {
            let index_path = engine.config().index_path.clone();
            let index = engine.build()?;
            Ok(json!({
                "index_path": index_path,
                "source_hash": index.source_hash,
                "stats": index.stats,
            }))
        }
        Command::CheckIndex => {
            let up_to_date = engine.check_freshness()?;
            Ok(json!({
                "up_to_date": up_to_date,
                "index_path": engine.config().index_path,
            }))
        }
        Command::Search(args) => {
            let hits = engine
                .searcher()?
                .search(&args.query, args.category, args.limit);
            let result = json!({
                "query": args.query,
                "count": hits.len(),
                "hits": hits,
            });
            engine.record_response("search", &result);
            Ok(result)
        }
        Command::Extract(args) => {
            let extraction = engine.extractor()?.extract(&args.id, args.outline)?;
            engine.record_extraction("extract", &extraction);
            Ok(serde_json::to_value(extraction)?)
        }
        Command::GetSection(args) => {
            let extraction = engine.extractor()?.get_section(&args.id, args.outline)?;
            engine.record_extraction("get-section", &extraction);
            Ok(serde_json::to_value(extraction)?)
        }
        Command::Get(args) => {
            let extraction =
                engine
                    .extractor()?
                    .get_entity(args.kind, &args.name, args.outline)?;
            engine.record_extraction("get", &extraction);
            Ok(serde_json::to_value(extraction)?)
        }
        Command::List(args) => {
            let listed = engine.list(args.category, args.doc_category.as_deref())?;
            let result = serde_json::to_value(listed)?;
            engine.record_response("list", &result);
            Ok(result)
        }
        Command::ListEntities(args) => {
            let result = serde_json::to_value(
                engine.extractor()?.list_entities(args.kind, &args.filters),
            )?;
            engine.record_response("list-entities", &result);
            Ok(result)
        }
        Command::Facets(args) => {
            let facets = engine.searcher()?.facet_counts(args.kind, &args.attribute);
            Ok(json!({
                "kind": args.kind,
                "attribute": args.attribute,
                "facets": facets,
            }))
        }
        Command::Find(args) => {
            let found = serde_json::to_value(engine.searcher()?.find_by_attribute(
                args.kind,
                &args.attribute,
                &args.value,
            ))?;
            let result = json!({
                "kind": args.kind,
                "attribute": args.attribute,
                "value": args.value,
                "entities": found,
            });
            engine.record_response("find", &result);
            Ok(result)
        }
        Command::Tags => {
            let tags = engine.searcher()?.list_tags();
            Ok(json!({ "count": tags.len(), "tags": tags }))
        }
        Command::Tagged(args) => {
            let found =
                serde_json::to_value(engine.searcher()?.find_by_tag(&args.tag, args.kind))?;
            let result = json!({ "tag": args.tag, "entities": found });
            engine.record_response("tagged", &result);
            Ok(result)
        }
        Command::Authors => {
            let authors = engine.searcher()?.list_authors();
            Ok(json!({ "count": authors.len(), "authors": authors }))
        }
        Command::Examples(args) => {
            let result =
                serde_json::to_value(engine.extractor()?.examples_for_section(&args.topic)?)?;
            engine.record_response("examples", &result);
            Ok(result)
        }
        Command::Suggest(args) => {
            let suggestions = engine.searcher()?.suggest(&args.query, args.count);
            Ok(json!({ "query": args.query, "suggestions": suggestions }))
        }
        Command::Batch(args) => {
            let outcomes = {
                let extractor = engine.extractor()?;
                batch::run(&args.ids, args.workers, |id| {
                    extractor.extract(id, args.outline)
                })?
            };
            for outcome in &outcomes {
                if let BatchOutcome::Ok { result, .. } = outcome {
                    engine.record_extraction("batch", result);
                }
            }
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            Ok(json!({
                "total": outcomes.len(),
                "failed": failed,
                "results": outcomes,
            }))
        }
        Command::Status => Ok(serde_json::to_value(engine.status()?)?),
        Command::TokenReport => Ok(serde_json::to_value(engine.usage_report()?)?),
        Command::Serve | Command::Completions(_) => Err(Error::Config(format!(
            "{} does not produce a JSON result",
            command.name()
        ))),
    }
}

fn fail(command: &str, error: &Error, suggestions: Vec<String>) -> ExitCode {
    let mut response = json!({
        "status": "error",
        "command": command,
        "error": error.to_string(),
    });
    if !suggestions.is_empty() {
        response["suggestions"] = json!(suggestions);
    }
    emit(&response);
    exit_code(error)
}

/// 1 for lookups and usage, 2 when there is nothing to index, 3 when a
/// corrupt index could not be rebuilt.
fn exit_code(error: &Error) -> ExitCode {
    match error {
        Error::NoSourceFiles(_) | Error::IndexNotFound(_) => ExitCode::from(2),
        Error::IndexCorrupt { .. } | Error::InvalidIndexField { .. } => {
            ExitCode::from(3)
        }
        _ => ExitCode::from(1),
    }
}

fn emit(value: &Value) {
    let mut stdout = std::io::stdout().lock();
    let written = serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(std::io::Error::from)
        .and_then(|()| writeln!(stdout));
    if let Err(e) = written {
        tracing::error!(error = %e, "Failed to write output");
    }
}
