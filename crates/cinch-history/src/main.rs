//! Run the history pipeline over a JSON message log and print the result.
//!
//! Reads `OPENROUTER_KEY` when `--summary-model` is given.
//!
//! # Examples
//!
//! ```sh
//! # Trim a log to the last 20 messages
//! cinch-history --input session.json --max-messages 20
//!
//! # Pipe a log through, token budget with the built-in estimator
//! cat session.json | cinch-history --max-tokens 32000 --pretty
//!
//! # Keep anything mentioning the deploy, summarize with a cheap model
//! cinch-history --input session.json --keyword deploy \
//!   --original-request "Ship v2 to staging" \
//!   --summary-model openai/gpt-4o-mini
//!
//! # Options from a file, with clearing switched on
//! cinch-history --input session.json --config history.json --clear-tools
//! ```

use cinch_history::Message;
use cinch_history::api::OpenRouterSummaryModel;
use cinch_history::context::CharEstimateCounter;
use cinch_history::pipeline::{Pipeline, ProcessOptions};
use clap::Parser;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Repair and bound a multi-agent conversation log before the next model call.
///
/// Reads a JSON array of messages and prints the processed array to stdout.
#[derive(Parser, Debug)]
#[command(name = "cinch-history")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// JSON file with the message array (stdin when omitted)
    #[arg(long)]
    input: Option<PathBuf>,

    /// JSON file with pipeline options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Budget ─────────────────────────────────────────────────
    /// Non-system messages kept when trimming by count
    #[arg(long)]
    max_messages: Option<usize>,

    /// Token budget, measured with the built-in character estimator
    #[arg(long)]
    max_tokens: Option<usize>,

    // ── Preservation ───────────────────────────────────────────
    /// Keep messages containing this text regardless of age (repeatable)
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// The user's original request; messages containing it are kept
    #[arg(long)]
    original_request: Option<String>,

    // ── Stages ─────────────────────────────────────────────────
    /// Replace old tool results with a placeholder
    #[arg(long)]
    clear_tools: bool,

    /// Never clear results of this tool (repeatable)
    #[arg(long = "protect-tool")]
    protected_tools: Vec<String>,

    /// Leave old tool results uncompressed
    #[arg(long)]
    no_compression: bool,

    /// Summarize old history with this OpenRouter model
    #[arg(long)]
    summary_model: Option<String>,

    // ── Output ─────────────────────────────────────────────────
    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    /// Label attached to log lines
    #[arg(long)]
    log_prefix: Option<String>,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_input(path: Option<&Path>) -> Result<String, String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read input '{}': {e}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn parse_messages(content: &str) -> Result<Vec<Message>, String> {
    serde_json::from_str(content).map_err(|e| format!("failed to parse messages: {e}"))
}

fn load_options(path: &Path) -> Result<ProcessOptions, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    ProcessOptions::from_json(&content)
}

/// Merge the config file (if any) with command-line overrides.
fn build_options(cli: &Cli) -> Result<ProcessOptions, String> {
    let mut options = match &cli.config {
        Some(path) => load_options(path)?,
        None => ProcessOptions::default(),
    };

    if let Some(count) = cli.max_messages {
        options = options.with_fallback_message_count(count);
    }
    if let Some(max_tokens) = cli.max_tokens {
        options = options
            .with_max_tokens(max_tokens)
            .with_token_counter(CharEstimateCounter::default());
    }
    if !cli.keywords.is_empty() {
        options = options.with_preserve_keywords(cli.keywords.iter().cloned());
    }
    if let Some(request) = &cli.original_request {
        options = options.with_original_request(request.clone());
    }
    if cli.clear_tools {
        options.clearing.enabled = true;
    }
    for tool in &cli.protected_tools {
        options.clearing.config.exclude_tools.insert(tool.clone());
    }
    if cli.no_compression {
        options = options.without_compression();
    }
    if let Some(model) = &cli.summary_model {
        options = options.with_summary_model(OpenRouterSummaryModel::from_env(model.clone())?);
    }
    if let Some(prefix) = &cli.log_prefix {
        options = options.with_log_prefix(prefix.clone());
    }
    Ok(options)
}

async fn run(cli: &Cli) -> Result<String, String> {
    let options = build_options(cli)?;
    let messages = parse_messages(&read_input(cli.input.as_deref())?)?;

    let output = Pipeline::new(options).process(messages).await;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    };
    rendered.map_err(|e| format!("failed to serialize output: {e}"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
