//! mcp-dispatch: a demo MCP server over stdio
//!
//! Serves an `echo` tool, a `greeting` prompt, an `about` resource and the
//! roots listed in the configuration file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_dispatch::config::{self, Config};
use mcp_dispatch::mcp::protocol::ErrorObject;
use mcp_dispatch::mcp::server::{serve_stdio, Server};
use mcp_dispatch::mcp::transport::StdioTransport;
use mcp_dispatch::providers::{
    LevelSetting, LogLevel, Prompt, PromptArgument, PromptMessage, PromptRegistry, Resource,
    ResourceRegistry, Role, RootRegistry, Tool, ToolCallResult, ToolRegistry,
};

/// Demo Model Context Protocol server.
///
/// Speaks JSON-RPC 2.0 over stdin/stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "mcp-dispatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the demo server over `transport`.
fn demo_server(cfg: &Config, transport: Arc<StdioTransport>) -> Result<Server, ErrorObject> {
    let tools = ToolRegistry::new();
    tools.register(
        Tool::new(
            "echo",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string", "description": "Text to echo back"}},
                "required": ["message"]
            }),
        )
        .with_description("Returns its message unchanged"),
        |arguments| async move {
            let message = arguments
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            Ok(ToolCallResult::text(message))
        },
    )?;

    let prompts = PromptRegistry::new();
    prompts.register(
        Prompt::new("greeting")
            .with_description("Asks the model to greet someone")
            .with_argument(PromptArgument::required("name").with_description("Who to greet")),
        vec![PromptMessage::text(
            Role::User,
            "Please write a short, friendly greeting for {{name}}.",
        )],
    )?;

    let resources = ResourceRegistry::new();
    resources.register_text(
        Resource::new("mcp-dispatch://about", "About")
            .with_description("Server name and version")
            .with_mime_type("text/plain"),
        format!("{} {}", cfg.server.name, cfg.server.version),
    )?;

    let roots = RootRegistry::from_roots(cfg.roots())?;

    Ok(Server::builder(cfg.identity())
        .options(cfg.protocol_options())
        .tools(Arc::new(tools))
        .prompts(Arc::new(prompts))
        .resources(Arc::new(resources))
        .roots(Arc::new(roots))
        .logging(Arc::new(LevelSetting::new(LogLevel::Info)))
        .build(transport))
}

/// Entry point for the mcp-dispatch server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig was read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %cfg.server.name,
        "Starting mcp-dispatch server"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let transport = Arc::new(
            StdioTransport::new().with_max_message_bytes(cfg.transport.max_message_bytes),
        );
        let server = match demo_server(&cfg, Arc::clone(&transport)) {
            Ok(server) => server,
            Err(e) => return Err(e.to_string()),
        };

        info!("MCP server ready, waiting for client connection...");
        serve_stdio(&server, &transport)
            .await
            .map_err(|e| e.to_string())
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
