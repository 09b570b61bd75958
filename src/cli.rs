//! CLI entry points: the gateway server and a text-mode REPL.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::agent::Orchestrator;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "voxgate")]
#[command(about = "Real-time WebRTC voice-assistant gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default)
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Listen port
        #[arg(short, long, env = "PORT", default_value_t = 8080)]
        port: u16,
        /// Serve HTTPS (required for getUserMedia on a LAN)
        #[arg(long, env = "HTTPS")]
        https: bool,
        /// TLS certificate path
        #[arg(long, env = "CERT_PATH")]
        cert: Option<String>,
        /// TLS key path
        #[arg(long, env = "KEY_PATH")]
        key: Option<String>,
    },
    /// Text-only conversation loop against the configured model host
    Repl {
        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // The REPL keeps the terminal quiet unless asked; the server logs INFO.
    let default_level = match &cli.command {
        Some(Commands::Repl { debug: true }) => tracing::Level::DEBUG,
        Some(Commands::Repl { debug: false }) => tracing::Level::WARN,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    match cli.command {
        Some(Commands::Repl { debug }) => repl(debug).await,
        Some(Commands::Serve {
            host,
            port,
            https,
            cert,
            key,
        }) => crate::server::start(&host, port, https, cert, key).await,
        None => crate::server::start("0.0.0.0", Config::from_env().port, false, None, None).await,
    }
}

/// Text REPL: ensure a model (offering to pull one), then loop turns.
async fn repl(_debug: bool) -> Result<()> {
    let cfg = Arc::new(Config::from_env());
    let mut orchestrator = Orchestrator::new(cfg.clone());

    let mut active = match orchestrator.ensure_model().await {
        Ok(active) => active,
        Err(e) => {
            eprintln!("Cannot reach the model host at {}: {e:#}", cfg.ollama_url);
            eprintln!("Is Ollama running? Start it with: ollama serve");
            return Ok(());
        }
    };

    if active.is_empty() {
        for model in [&cfg.ollama_model, &cfg.ollama_fallback_model] {
            if pull_model_interactive(&orchestrator, model).await? {
                active = orchestrator.ensure_model().await?;
            }
            if !active.is_empty() {
                break;
            }
        }
    }
    if active.is_empty() {
        println!(
            "No model available. Install one with: ollama pull {}",
            cfg.ollama_model
        );
        return Ok(());
    }
    orchestrator.set_model(active.clone());

    println!("Voxgate assistant ({active})");
    println!("Type 'quit' to exit, 'clear' to reset the conversation.\n");

    let on_tool_call: crate::agent::orchestrator::ToolCallHook =
        Arc::new(|name, args| println!("  tool: {name}({args})"));

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("You: ");
        stdout.flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            println!("\nGoodbye!");
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                orchestrator.clear_history();
                println!("Conversation cleared.\n");
                continue;
            }
            _ => {}
        }

        match orchestrator.chat(input, Some(on_tool_call.clone())).await {
            Ok(reply) => println!("Assistant: {reply}\n"),
            Err(e) => eprintln!("Error: {e:#}\n"),
        }
    }

    Ok(())
}

/// Offer to pull a missing model, streaming progress to the terminal.
async fn pull_model_interactive(orchestrator: &Orchestrator, model: &str) -> Result<bool> {
    println!("\nModel '{model}' is not installed.");
    print!("Pull it now? (y/n): ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        return Ok(false);
    }

    println!("Pulling {model}... this may take a few minutes.");
    let mut last_status = String::new();
    let result = orchestrator
        .client()
        .pull(model, |progress| {
            if progress.status != last_status {
                println!("  {}", progress.status);
                last_status = progress.status.clone();
            }
            true
        })
        .await;
    match result {
        Ok(()) => {
            println!("Model '{model}' ready.\n");
            Ok(true)
        }
        Err(e) => {
            eprintln!("Pull failed: {e:#}");
            Ok(false)
        }
    }
}
