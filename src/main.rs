//! Multi-Agent Query Relay
//!
//! `rust_relay` starts an interactive session on stdin.
//! `rust_relay serve` exposes the relay over HTTP.

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_relay::agent::provider_from_settings;
use rust_relay::config::{RelayConfig, DEFAULT_CONFIG_PATH};
use rust_relay::memory::ContextStore;
use rust_relay::server::{run_server, AppState};
use rust_relay::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rust_relay=info")),
        )
        .with_target(true)
        .init();

    let config_path = PathBuf::from(
        std::env::var("RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let config = RelayConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let bind = config.bind.clone();

    let provider = provider_from_settings(&config.llm)?;
    let supervisor = Arc::new(Supervisor::from_config(config, provider).await?);
    info!("Agents: {}", supervisor.registry().names().await.join(", "));

    if std::env::args().nth(1).as_deref() == Some("serve") {
        let state = AppState { supervisor, config_path };
        return run_server(state, &bind).await;
    }

    interactive(supervisor).await
}

async fn interactive(supervisor: Arc<Supervisor>) -> Result<()> {
    let session_id = uuid::Uuid::new_v4().to_string();

    println!("\n{}", "═".repeat(60));
    println!("Multi-Agent Query Relay v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", "═".repeat(60));
    println!("Session: {}", session_id);
    println!("Commands: 'quit' | 'history' | 'agents'\n");

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let query = input.trim();
        if query.is_empty() {
            continue;
        }

        match query.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("\nGoodbye!\n");
                break;
            }
            "history" => {
                let config = supervisor.config().await;
                match supervisor.store().load(&session_id).await {
                    Ok(session) if session.is_empty() => println!("\n(no turns yet)\n"),
                    Ok(session) => println!("\n{}\n", session.format_for_prompt(config.max_turns_per_session)),
                    Err(e) => println!("\nError: {}\n", e),
                }
                continue;
            }
            "agents" => {
                println!("\n{}\n", supervisor.registry().names().await.join(", "));
                continue;
            }
            _ => {}
        }

        match supervisor.handle_query(&session_id, query).await {
            Ok(response) => {
                let marker = if response.degraded { "⚠️" } else { "✅" };
                println!("\n{} [{}]", marker, response.contributing_agents.join(", "));
                println!("{}", "─".repeat(50));
                println!("{}", response.text);
                println!("{}\n", "─".repeat(50));
            }
            Err(e) => println!("\nError: {}\n", e),
        }
    }

    Ok(())
}
