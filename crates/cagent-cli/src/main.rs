//! cagent CLI: run one prompt through a configured agent team.

mod attach;
mod printer;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cagent_core::ai::gateway::GatewaySource;
use cagent_core::ai::router::ModelCatalog;
use cagent_core::config::Config;
use cagent_core::oauth::TokenStore;
use cagent_core::runtime::{Event, ResumeDecision, Runtime};
use cagent_core::session::{Message, Session};
use cagent_core::tools::mcp::McpToolset;
use cagent_core::tools::registry::ToolRegistry;
use cagent_core::tools::{fs, lsp, rag, shell};

use printer::Printer;

#[derive(Parser)]
#[command(name = "cagent", version, about = "Run a multi-agent session from the terminal")]
struct Cli {
    /// Prompt text, or '-' to read it from stdin.
    prompt: Option<String>,

    /// Agent configuration file.
    #[arg(long, default_value = "cagent.yaml")]
    config: PathBuf,

    /// Start with this agent instead of the configured root.
    #[arg(long)]
    agent: Option<String>,

    /// Run every tool call without asking for confirmation.
    #[arg(long)]
    auto_approve: bool,

    /// Do not render tool calls and results. Events are still produced.
    #[arg(long)]
    hide_tool_calls: bool,

    /// Print one JSON event per line instead of human-readable output.
    #[arg(long)]
    output_json: bool,

    /// Attach a file to the prompt. Repeatable.
    #[arg(long)]
    attach: Vec<PathBuf>,

    /// Port for the local OAuth callback server.
    #[arg(long)]
    oauth_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let raw_prompt = match cli.prompt.as_deref() {
        Some("-") => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading prompt from stdin")?;
            buffer
        }
        Some(prompt) => prompt.to_string(),
        None => anyhow::bail!("a prompt is required (use '-' to read stdin)"),
    };

    let config = Config::load(&cli.config)?;
    let root = cli
        .agent
        .clone()
        .or_else(|| config.root_agent().map(str::to_string))
        .context("no root agent: name one 'root' or pass --agent")?;
    let root_model = config
        .agents
        .get(&root)
        .map(|a| a.model.clone())
        .with_context(|| format!("unknown agent '{root}'"))?;

    let catalog = ModelCatalog::new(config.models.clone(), Box::new(GatewaySource));
    let tokens = Arc::new(TokenStore::default());
    let registry = build_registry(&config, &catalog, &root_model, tokens.clone()).await;

    let mut builder = Runtime::builder()
        .root(&root)
        .registry(registry)
        .catalog(catalog)
        .commands(config.commands.clone())
        .token_store(tokens)
        .working_dir(std::env::current_dir()?);
    for agent in config.agents() {
        builder = builder.agent(agent);
    }
    if let Some(port) = cli.oauth_port {
        builder = builder.callback_port(port);
    }
    let runtime = builder.build()?;

    let session = Session::new().shared();
    if cli.auto_approve {
        session.write().tools_approved = true;
    }

    // Command expansion, then inline /attach directives, then --attach.
    let resolved = runtime.resolve_command(raw_prompt.trim());
    let (prompt, mut attach_paths) = attach::extract_inline(&resolved);
    attach_paths.extend(cli.attach.iter().cloned());
    let parts = attach::build_parts(&attach_paths)?;
    let message = Message::user(&root, prompt).with_parts(parts);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut events = runtime.run(cancel.clone(), session, message)?;
    let mut printer = Printer::new(cli.hide_tool_calls, cli.output_json);
    let mut saw_error = false;

    while let Some(event) = events.recv().await {
        printer.print(&event);

        match &event {
            Event::Error { .. } => saw_error = true,
            Event::ToolCallConfirmation { .. } => {
                let decision = match ask("approve? [y]es / [a]lways / [n]o: ").await.as_deref() {
                    Some("y") | Some("yes") => ResumeDecision::Approve,
                    Some("a") | Some("always") => ResumeDecision::ApproveForSession,
                    _ => ResumeDecision::Reject {
                        reason: "rejected by user".to_string(),
                    },
                };
                if let Err(e) = runtime.resume(decision) {
                    tracing::warn!(error = %e, "confirmation decision not delivered");
                }
            }
            Event::MaxIterationsReached { .. } => {
                let decision = match ask("continue for more iterations? [y/n]: ").await.as_deref() {
                    Some("y") | Some("yes") => ResumeDecision::Approve,
                    _ => ResumeDecision::Reject {
                        reason: "stopped at iteration limit".to_string(),
                    },
                };
                if let Err(e) = runtime.resume(decision) {
                    tracing::warn!(error = %e, "iteration decision not delivered");
                }
            }
            Event::ElicitationRequest { .. } => {
                let action = match ask("open browser to authorize? [y/n]: ").await.as_deref() {
                    Some("y") | Some("yes") => "accept",
                    _ => "decline",
                };
                if let Err(e) = runtime.resume_elicitation(action, serde_json::Value::Null) {
                    tracing::warn!(error = %e, "elicitation decision not delivered");
                }
            }
            _ => {}
        }
    }
    printer.finish();

    // Ctrl-C is a user action, not a failure.
    if cancel.is_cancelled() || !saw_error {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn build_registry(
    config: &Config,
    catalog: &ModelCatalog,
    root_model: &str,
    tokens: Arc<TokenStore>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    fs::register(&mut registry);
    shell::register(&mut registry, config.shell.clone());

    if !config.lsp_server.is_empty() {
        lsp::register(&mut registry, config.lsp_server.clone());
    }

    if !config.knowledge_files.is_empty() {
        let mut documents = Vec::new();
        for path in &config.knowledge_files {
            match std::fs::read_to_string(path) {
                Ok(content) => documents.push(content),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping knowledge file"),
            }
        }
        match catalog.resolve(root_model, "") {
            Ok(resolved) => rag::register(&mut registry, resolved.adapter, documents),
            Err(e) => tracing::warn!(error = %e, "knowledge base disabled: no adapter"),
        }
    }

    for (name, url) in &config.mcp_servers {
        let toolset = McpToolset::new(name.clone(), url.clone(), tokens.clone());
        match toolset.discover(&mut registry).await {
            Ok(count) => tracing::info!(server = name, tools = count, "MCP server connected"),
            Err(e) => tracing::warn!(server = name, error = %e, "MCP discovery failed"),
        }
    }

    registry
}

/// Ask one line on the terminal. Stdin is acquired only for the read and
/// handed back immediately.
async fn ask(question: &str) -> Option<String> {
    eprint!("{question}");
    let _ = std::io::stderr().flush();
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .ok()
            .map(|_| line.trim().to_ascii_lowercase())
    })
    .await
    .ok()
    .flatten()
}
