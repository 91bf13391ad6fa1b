use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hush", about = "Hush: secrets that self-destruct after one read", version)]
struct Cli {
    /// Hush server URL (default: http://localhost:8080 or $HUSH_SERVER)
    #[arg(long, env = "HUSH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Hush HTTP server
    Serve {
        /// Port to listen on (default: $HUSH_PORT or 8080)
        #[arg(long, env = "HUSH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $HUSH_HOST or 0.0.0.0)
        #[arg(long, env = "HUSH_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Hide a message; prints the key to send to the recipient
    Hide {
        /// Message text, or `-` to read it from stdin
        message: String,
        /// Time until the secret expires, 1d to 7d
        #[arg(long, default_value = "7d")]
        expires: String,
        /// Encrypt the message with this passphrase
        #[arg(long, env = "HUSH_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
    /// Generate a password and hide it
    Password {
        /// Time until the secret expires, 1d to 7d
        #[arg(long, default_value = "7d")]
        expires: String,
        /// Encrypt the password with this passphrase
        #[arg(long, env = "HUSH_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
    /// Reveal a secret; it is destroyed on success
    Reveal {
        /// Key received from the sender
        key: String,
        /// Passphrase, if the sender set one
        #[arg(long, env = "HUSH_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSH_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Hide {
            message,
            expires,
            passphrase,
        } => {
            let content = read_message(&message)?;
            cmd_hide(&cli.server, &content, &expires, passphrase.as_deref()).await
        }

        Commands::Password {
            expires,
            passphrase,
        } => cmd_password(&cli.server, &expires, passphrase.as_deref()).await,

        Commands::Reveal { key, passphrase } => {
            cmd_reveal(&cli.server, &key, passphrase.as_deref()).await
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = hush_server::ServerConfig {
        host,
        port,
        ..hush_server::ServerConfig::from_env()?
    };
    tracing::info!(storage = ?cfg.storage, "starting hush");
    hush_server::run(cfg).await
}

async fn cmd_hide(
    server: &str,
    content: &str,
    expires: &str,
    passphrase: Option<&str>,
) -> Result<()> {
    let body = json!({
        "content": content,
        "ttl_seconds": parse_duration(expires)?,
        "passphrase": passphrase.unwrap_or(""),
    });
    let json = post_json(server, "/secrets", &body).await?;

    println!("Private key:");
    println!("{}", json["key"].as_str().unwrap_or(""));
    Ok(())
}

async fn cmd_password(server: &str, expires: &str, passphrase: Option<&str>) -> Result<()> {
    let body = json!({
        "ttl_seconds": parse_duration(expires)?,
        "passphrase": passphrase.unwrap_or(""),
    });
    let json = post_json(server, "/passwords", &body).await?;

    println!("Password:");
    println!("{}", json["password"].as_str().unwrap_or(""));
    println!("Private key:");
    println!("{}", json["key"].as_str().unwrap_or(""));
    Ok(())
}

async fn cmd_reveal(server: &str, key: &str, passphrase: Option<&str>) -> Result<()> {
    let body = json!({ "passphrase": passphrase.unwrap_or("") });
    let path = format!("/secrets/{}/reveal", key.trim());
    let json = post_json(server, &path, &body).await?;

    let label = if json["is_password"].as_bool().unwrap_or(false) {
        "Password:"
    } else {
        "Secret:"
    };
    println!("{label}");
    println!("{}", json["content"].as_str().unwrap_or(""));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_message(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_owned());
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read message from stdin")?;
    Ok(buf.trim_end_matches('\n').to_owned())
}

/// Parse human duration strings like "1d", "36h", "7d" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

async fn post_json(server: &str, path: &str, body: &Value) -> Result<Value> {
    let resp = Client::new()
        .post(format!("{}{}", server.trim_end_matches('/'), path))
        .json(body)
        .send()
        .await
        .context("HTTP request failed")?;
    read_json(resp).await
}

async fn read_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if status.is_success() {
        Ok(json)
    } else {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{error} ({status})")
    }
}
