use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::{Value, json};

const PATTERNS: &str = "# Reversal Patterns\n\n## Hammer\nBullish reversal after a downtrend.\n\n## Morning Star\nThree-candle bullish reversal.\n\n```pine\nplot(close)\n```\n";

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let sources = data_dir.join("raw");
    std::fs::create_dir_all(&sources)?;
    std::fs::write(sources.join("reversals.md"), PATTERNS)?;
    Ok(())
}

fn call(name: &str, args: Value) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name.to_string());
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_search_and_extract_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docslice_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.args(["serve", "--profile", "candlestick"])
                .env("DOCSLICE_DATA_DIR", tempdir.path())
                .env("DOCSLICE_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let result = client
        .peer()
        .call_tool(call(
            "docslice_search",
            json!({ "query": "morning star", "category": "patterns", "limit": 1 }),
        ))
        .await?;
    let structured = result.structured_content.expect("structured content");
    let hits = structured
        .get("hits")
        .and_then(|v| v.as_array())
        .expect("hits array");
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].get("id").and_then(|v| v.as_str()),
        Some("pat/morning-star")
    );

    let get_result = client
        .peer()
        .call_tool(call(
            "docslice_get",
            json!({ "kind": "pattern", "name": "Hammer" }),
        ))
        .await?;
    let text = get_result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default();
    assert!(text.starts_with("## Hammer"));
    assert!(!text.contains("Morning Star"));

    let outline = client
        .peer()
        .call_tool(call(
            "docslice_extract",
            json!({ "id": "pat/morning-star", "outline": true }),
        ))
        .await?;
    let structured = outline.structured_content.expect("structured content");
    let content = structured
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    assert!(content.contains("## Morning Star"));
    assert!(content.contains("```pine"));
    assert!(!content.contains("plot(close)"));

    let missing = client
        .peer()
        .call_tool(call("docslice_extract", json!({ "id": "pat/hammr" })))
        .await?;
    assert_eq!(missing.is_error, Some(true));

    assert!(tempdir.path().join("index.json").is_file());
    assert!(tempdir.path().join("token_log.jsonl").is_file());

    client.cancel().await?;
    Ok(())
}

fn docslice_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docslice") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docslice");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
