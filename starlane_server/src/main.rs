//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p starlane_server -- [--config server.json] [--port 42500]
//!       [--name "My Server"] [--max-players 64] [--login-url https://...]
//!
//! The server accepts connections, synchronizes the string table to every
//! authenticated peer, and runs the region scheduler until told to quit.
//!
//! Console commands:
//!   status  - Show player/table counts
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use starlane_server::GameServer;
use starlane_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = ServerConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                let raw = std::fs::read_to_string(&args[i + 1])
                    .with_context(|| format!("read config {}", args[i + 1]))?;
                cfg = ServerConfig::from_json_str(&raw).context("parse config")?;
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                cfg.port = args[i + 1].parse().unwrap_or(cfg.port);
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.server_name = args[i + 1].clone();
                i += 2;
            }
            "--max-players" if i + 1 < args.len() => {
                cfg.max_players = args[i + 1].parse().unwrap_or(cfg.max_players);
                i += 2;
            }
            "--login-url" if i + 1 < args.len() => {
                cfg.login_url = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(name = %cfg.server_name, port = cfg.port, max_players = cfg.max_players, "Starting server");

    let mut server = GameServer::bind(cfg).await.context("create server")?;
    info!(addr = %server.local_addr(), discovery = %server.discovery_addr(), "Sockets bound");
    server.start()?;

    // Console input off the runtime: a plain stdin reader thread.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    while let Some(line) = console_rx.recv().await {
        match line.as_str() {
            "quit" | "exit" => break,
            "status" => println!("{}", server.status()),
            other => println!("Unknown command: {other}"),
        }
    }

    server.stop().await;
    Ok(())
}
