//! # Focus Harness CLI (`focus`)
//!
//! The `focus` binary answers queries from the terminal and starts the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! focus --config ./config/focus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `focus ask "<query>"` | Stream a cited answer |
//! | `focus images "<query>"` | Image search |
//! | `focus videos "<query>"` | Video search |
//! | `focus suggest --history <json>` | Follow-up suggestions |
//! | `focus modes` | List focus modes |
//! | `focus serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Web answer with citations
//! focus ask "What is the capital of France?"
//!
//! # Reddit focus with prior conversation
//! focus ask "and what do people think of it?" --mode reddit \
//!     --history '[{"role":"user","content":"rust async"},{"role":"assistant","content":"..."}]'
//!
//! # Machine-readable event stream
//! focus ask "rust borrow checker" --json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

use focus_harness::config::{self, Config};
use focus_harness::focus::{self, FocusRegistry};
use focus_harness::logging::init_logging;
use focus_harness::media::MediaSearch;
use focus_harness::models::{ChatMessage, PipelineEvent, PipelineRequest};
use focus_harness::pipeline::{Pipeline, PipelineSettings};
use focus_harness::server;
use focus_harness::services::Services;
use focus_harness::suggestions::SuggestionGenerator;

/// Focus Harness CLI: retrieval-augmented answers with citations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file at the default path falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "focus",
    about = "Focus Harness: rewrite, search, rerank and stream cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/focus.toml")]
    config: PathBuf,

    /// Log at info level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query, streaming the response to stdout.
    ///
    /// Sources are listed after the answer as numbered citations.
    Ask {
        query: String,

        /// Focus mode (see `focus modes`).
        #[arg(long, default_value = focus::DEFAULT_MODE)]
        mode: String,

        /// Prior conversation as a JSON array of `{role, content}` messages.
        #[arg(long)]
        history: Option<String>,

        /// Print pipeline events as JSON lines instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Search for images related to a query.
    Images {
        query: String,
        #[arg(long)]
        history: Option<String>,
    },

    /// Search for videos related to a query.
    Videos {
        query: String,
        #[arg(long)]
        history: Option<String>,
    },

    /// Suggest follow-up questions for a conversation.
    Suggest {
        /// Conversation as a JSON array of `{role, content}` messages.
        #[arg(long)]
        history: String,
    },

    /// List available focus modes.
    Modes,

    /// Start the HTTP server.
    Serve,
}

fn parse_history(raw: Option<&str>) -> Result<Vec<ChatMessage>> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .context("--history must be a JSON array of {role, content} messages"),
    }
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new("./config/focus.toml") {
        return Ok(Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose || matches!(cli.command, Commands::Serve) {
        "info"
    } else {
        "warn"
    };
    init_logging(default_level);

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Modes => {
            let modes = FocusRegistry::from_config(&cfg);
            for mode in modes.modes() {
                let kind = match (mode.has_retrieval(), mode.reranks()) {
                    (false, _) => "generation only",
                    (true, true) => "search + rerank",
                    (true, false) => "search",
                };
                println!("{:<16} {:<18} {}", mode.name, kind, mode.description);
            }
        }
        Commands::Ask {
            query,
            mode,
            history,
            json,
        } => {
            let history = parse_history(history.as_deref())?;
            run_ask(&cfg, &query, &mode, history, json).await?;
        }
        Commands::Images { query, history } => {
            let history = parse_history(history.as_deref())?;
            let media = MediaSearch::new(
                Services::from_config(&cfg)?,
                PipelineSettings::from_config(&cfg),
            );
            let images = media.images(&query, &history).await?;
            if images.is_empty() {
                println!("No images.");
            }
            for (i, img) in images.iter().enumerate() {
                println!("{}. {}\n   {}\n   {}", i + 1, img.title, img.url, img.img_src);
            }
        }
        Commands::Videos { query, history } => {
            let history = parse_history(history.as_deref())?;
            let media = MediaSearch::new(
                Services::from_config(&cfg)?,
                PipelineSettings::from_config(&cfg),
            );
            let videos = media.videos(&query, &history).await?;
            if videos.is_empty() {
                println!("No videos.");
            }
            for (i, v) in videos.iter().enumerate() {
                println!("{}. {}\n   {}\n   player: {}", i + 1, v.title, v.url, v.iframe_src);
            }
        }
        Commands::Suggest { history } => {
            let history = parse_history(Some(&history))?;
            let services = Services::from_config(&cfg)?;
            let suggestions = SuggestionGenerator::new(cfg.llm.timeout())
                .generate(services.llm.as_ref(), &history)
                .await?;
            for s in suggestions {
                println!("- {}", s);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ask(
    cfg: &Config,
    query: &str,
    mode_name: &str,
    history: Vec<ChatMessage>,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let modes = FocusRegistry::from_config(cfg);
    let Some(mode) = modes.find(mode_name) else {
        bail!(
            "Unknown focus mode: '{}'. Available: {}",
            mode_name,
            modes.names().join(", ")
        );
    };

    let services = Services::from_config(cfg)?;
    let pipeline = Pipeline::new(services, mode, PipelineSettings::from_config(cfg));
    let mut rx = pipeline.spawn(PipelineRequest::new(query, history));

    let mut stdout = std::io::stdout();
    let mut sources = Vec::new();
    let mut failed = None;

    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            if let PipelineEvent::Error(msg) = event {
                failed = Some(msg);
            }
            continue;
        }
        match event {
            PipelineEvent::Sources(docs) => sources = docs,
            PipelineEvent::ResponseChunk(chunk) => {
                write!(stdout, "{}", chunk)?;
                stdout.flush()?;
            }
            PipelineEvent::End => println!(),
            PipelineEvent::Error(msg) => failed = Some(msg),
        }
    }

    if !json && !sources.is_empty() {
        println!("\nSources:");
        for (i, doc) in sources.iter().enumerate() {
            println!("  [{}] {} ({})", i + 1, doc.metadata.title, doc.metadata.url);
        }
    }

    if let Some(msg) = failed {
        bail!("{}", msg);
    }
    Ok(())
}
