//! CLI entry point for chat-relay

mod client;

use anyhow::Result;
use chat_relay_core::config::{Config, ConfigLoader};
use chat_relay_core::logging::init_logging;
use chat_relay_server::{run_server, AppState};
use chat_relay_stream::{StreamEvent, DEFAULT_SESSION_ID};
use clap::{Parser, Subcommand};
use console::style;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::ApiClient;

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming relay between chat clients and a text generation backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
    /// Run the streaming HTTP server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Stream one reply to the terminal
    Chat {
        /// Prompt to send
        #[arg(short, long)]
        message: String,
        /// Session key for conversation continuity
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Show a session's turns from a running server
    History {
        #[arg(short, long, default_value = DEFAULT_SESSION_ID)]
        session: String,
        /// Server base URL, defaults to the configured address
        #[arg(long)]
        server: Option<String>,
    },
    /// Print a session as Markdown from a running server
    Export {
        #[arg(short, long, default_value = DEFAULT_SESSION_ID)]
        session: String,
        /// Server base URL, defaults to the configured address
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    if let Commands::Onboard { force } = cli.command {
        return run_onboard(&config_loader, force);
    }

    let config = config_loader.load()?;
    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Commands::Onboard { .. } => Ok(()),
        Commands::Serve { host, port } => {
            info!("Starting server");
            run_serve(config, host, port).await
        }
        Commands::Chat { message, session } => {
            info!("Processing message: {}", message);
            run_chat(&config, message, session).await
        }
        Commands::History { session, server } => {
            run_history(&config, &session, server).await
        }
        Commands::Export { session, server } => run_export(&config, &session, server).await,
    }
}

fn run_onboard(loader: &ConfigLoader, force: bool) -> Result<()> {
    println!("{}", style("Welcome to chat-relay!").bold().cyan());

    let config_path = loader.config_path();
    if config_path.exists() && !force {
        println!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
        return Ok(());
    }

    loader.save(&Config::default())?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start the server", style("chat-relay serve").cyan());
    println!(
        "  {} - Send a message",
        style("chat-relay chat --message 'Hello!'").cyan()
    );

    Ok(())
}

async fn run_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let addr = tokio::net::lookup_host((config.server.host.as_str(), config.server.port))
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("cannot resolve {}", config.server.host))?;

    println!(
        "{} {} (model {})",
        style("Serving on").bold().cyan(),
        addr,
        config.provider.model
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    run_server(AppState::from_config(&config), addr, shutdown_rx).await?;
    println!("{}", style("Server stopped.").green());
    Ok(())
}

async fn run_chat(config: &Config, message: String, session: Option<String>) -> Result<()> {
    let state = AppState::from_config(config);
    let session = session.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

    let mut events = state.coalescer.stream(message, session);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Content(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            StreamEvent::Failed(failure) => {
                warn!("Stream failed: {}", failure);
                println!("\n{} {}", style("Error:").red().bold(), failure);
            }
            StreamEvent::NoContent => {
                println!("{}", style("(no content received from model)").dim());
            }
            StreamEvent::Done => println!(),
        }
    }
    Ok(())
}

fn server_url(config: &Config, server: Option<String>) -> String {
    server.unwrap_or_else(|| {
        let host = match config.server.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            host => host,
        };
        format!("http://{}:{}", host, config.server.port)
    })
}

async fn run_history(config: &Config, session: &str, server: Option<String>) -> Result<()> {
    let client = ApiClient::new(server_url(config, server));
    let turns = client.history(session).await?;

    if turns.is_empty() {
        println!("No turns recorded for session {}", style(session).cyan());
        return Ok(());
    }

    println!("{}", style(format!("Session {}", session)).bold().cyan());
    for turn in turns {
        println!(
            "\n{} {}",
            style(turn.role.as_str()).bold(),
            style(turn.timestamp.format("%H:%M:%S")).dim()
        );
        println!("{}", turn.content);
    }
    Ok(())
}

async fn run_export(config: &Config, session: &str, server: Option<String>) -> Result<()> {
    let client = ApiClient::new(server_url(config, server));
    match client.export(session).await? {
        Some(document) => print!("{}", document),
        None => println!("No turns recorded for session {}", style(session).cyan()),
    }
    Ok(())
}
