use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "keyseat", about = "keyseat — single-seat license server", version)]
struct Cli {
    /// keyseat server URL (default: http://localhost:8080 or $KEYSEAT_SERVER)
    #[arg(long, env = "KEYSEAT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Bearer token for admin commands ($KEYSEAT_ADMIN_TOKEN)
    #[arg(long, env = "KEYSEAT_ADMIN_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the keyseat HTTP server
    Serve {
        /// Port to listen on (default: $KEYSEAT_PORT or 8080)
        #[arg(long, env = "KEYSEAT_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $KEYSEAT_HOST or 0.0.0.0)
        #[arg(long, env = "KEYSEAT_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Mint a new license key (admin)
    Create {
        /// Validity window in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// List all licenses with seat and expiry status (admin)
    List,
    /// Bind a license key to a client
    Activate {
        /// License key
        key: String,
        /// Client identifier claiming the seat
        #[arg(long)]
        client: String,
    },
    /// Check whether a key is valid and who holds the seat
    Validate {
        /// License key
        key: String,
        /// Client identifier to check the seat against
        #[arg(long)]
        client: Option<String>,
    },
    /// Refresh the seat while the licensed app is running
    Heartbeat {
        /// License key
        key: String,
        /// Client identifier holding the seat
        #[arg(long)]
        client: String,
    },
    /// Release the seat so another client can activate
    Deactivate {
        /// License key
        key: String,
        /// Client identifier holding the seat
        #[arg(long)]
        client: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KEYSEAT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Create { days } => {
            let token = require_token(&cli.token)?;
            cmd_create(&cli.server, &token, days).await
        }

        Commands::List => {
            let token = require_token(&cli.token)?;
            cmd_list(&cli.server, &token).await
        }

        Commands::Activate { key, client } => cmd_activate(&cli.server, &key, &client).await,

        Commands::Validate { key, client } => {
            cmd_validate(&cli.server, &key, client.as_deref()).await
        }

        Commands::Heartbeat { key, client } => {
            cmd_seat_op(&cli.server, "heartbeat", &key, &client).await
        }

        Commands::Deactivate { key, client } => {
            cmd_seat_op(&cli.server, "deactivate", &key, &client).await
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let admin_key = std::env::var("KEYSEAT_ADMIN_KEY")
        .context("KEYSEAT_ADMIN_KEY environment variable is required")?;
    if admin_key.is_empty() {
        anyhow::bail!("KEYSEAT_ADMIN_KEY must not be empty");
    }

    let cfg = keyseat_server::ServerConfig {
        host,
        port,
        admin_key: Some(admin_key),
        ..Default::default()
    };

    keyseat_server::run(cfg).await
}

async fn cmd_create(server: &str, token: &str, days: u32) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/admin/create", server.trim_end_matches('/')))
        .bearer_auth(token)
        .json(&json!({"days": days}))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let body: Value = resp.json().await.context("parse response")?;

    if !status.is_success() {
        anyhow::bail!(
            "server returned {status}: {}",
            body["error"].as_str().unwrap_or("")
        );
    }

    let key = body["key"].as_str().unwrap_or("");
    let expires_at = body["expires_at"].as_i64().unwrap_or(0);
    println!("✓ license created");
    println!("  key:        {key}");
    println!(
        "  expires_at: {expires_at} (in {})",
        format_duration((expires_at - unix_now()).max(0) as u64)
    );
    Ok(())
}

async fn cmd_list(server: &str, token: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/admin/list", server.trim_end_matches('/')))
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("server returned {status}");
    }

    let licenses: Vec<LicenseItem> = resp.json().await.context("parse license list")?;
    if licenses.is_empty() {
        println!("(no licenses)");
        return Ok(());
    }

    let now = unix_now();
    for lic in &licenses {
        let expiry = if lic.expires_at >= now {
            format!("expires in {}", format_duration((lic.expires_at - now) as u64))
        } else {
            "expired".to_string()
        };
        let seat = match &lic.active_client {
            Some(holder) => match lic.last_seen {
                Some(seen) if seen <= now => {
                    format!("{holder} (seen {} ago)", format_duration((now - seen) as u64))
                }
                _ => holder.clone(),
            },
            None => "free".to_string(),
        };
        println!("  {} — {} — seat: {}", lic.key, expiry, seat);
    }
    Ok(())
}

async fn cmd_activate(server: &str, key: &str, client_id: &str) -> Result<()> {
    let (status, body) = post_json(
        server,
        "activate",
        json!({"key": key, "client_id": client_id}),
    )
    .await?;

    if status.is_success() {
        let expires_at = body["expires_at"].as_i64().unwrap_or(0);
        println!(
            "✓ activated — expires in {}",
            format_duration((expires_at - unix_now()).max(0) as u64)
        );
        return Ok(());
    }

    let error = body["error"].as_str().unwrap_or("unknown error");
    match body["active_client"].as_str() {
        Some(holder) => anyhow::bail!("{error} (held by {holder})"),
        None => anyhow::bail!("{error}"),
    }
}

async fn cmd_validate(server: &str, key: &str, client_id: Option<&str>) -> Result<()> {
    let mut payload = json!({"key": key});
    if let Some(c) = client_id {
        payload["client_id"] = json!(c);
    }
    let (status, body) = post_json(server, "validate", payload).await?;

    if !status.is_success() {
        anyhow::bail!("{}", body["error"].as_str().unwrap_or("unknown error"));
    }

    let ok = body["ok"].as_bool().unwrap_or(false);
    let expires_at = body["expires_at"].as_i64().unwrap_or(0);
    println!("ok: {ok}");
    match body["active_client"].as_str() {
        Some(holder) => println!("seat: {holder}"),
        None => println!("seat: free"),
    }
    println!(
        "expires in {}",
        format_duration((expires_at - unix_now()).max(0) as u64)
    );
    Ok(())
}

async fn cmd_seat_op(server: &str, op: &str, key: &str, client_id: &str) -> Result<()> {
    let (status, body) = post_json(server, op, json!({"key": key, "client_id": client_id})).await?;

    if status.is_success() {
        println!("✓ {op} ok");
        Ok(())
    } else {
        anyhow::bail!("{}", body["error"].as_str().unwrap_or("unknown error"))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token / KEYSEAT_ADMIN_TOKEN is required for this command")
}

async fn post_json(server: &str, path: &str, payload: Value) -> Result<(reqwest::StatusCode, Value)> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/{}", server.trim_end_matches('/'), path))
        .json(&payload)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let body: Value = resp.json().await.context("parse response")?;
    Ok((status, body))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[derive(serde::Deserialize)]
struct LicenseItem {
    key: String,
    expires_at: i64,
    active_client: Option<String>,
    last_seen: Option<i64>,
}
