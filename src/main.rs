//! pushgate - push notification gateway client
//!
//! Sends notifications over the binary gateway protocol and reads the
//! feedback service.

mod config;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use pushgate_client::PushClient;
use pushgate_protocol::{Notification, Payload};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushgate")]
#[command(about = "Send push notifications through the binary gateway protocol")]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, env = "PUSHGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway platform (production or sandbox)
    #[arg(short, long)]
    platform: Option<String>,

    /// Path to provider certificate
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to provider private key (defaults to the certificate file)
    #[arg(long)]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one notification
    Send {
        /// Device token (hex)
        token: String,

        /// Alert text
        #[arg(short, long)]
        alert: Option<String>,

        /// Badge number
        #[arg(short, long)]
        badge: Option<u32>,

        /// Sound name
        #[arg(short, long)]
        sound: Option<String>,

        /// Expiration as Unix seconds
        #[arg(short, long)]
        expiration: Option<i64>,

        /// Priority (10 immediate, 5 conserve power)
        #[arg(long)]
        priority: Option<u8>,

        /// Identifier reported back if the notification is rejected
        #[arg(short, long)]
        identifier: Option<String>,

        /// Seconds to wait for a rejection before exiting
        #[arg(short, long, default_value_t = 5)]
        wait: u64,
    },

    /// List devices reported unreachable by the feedback service
    Feedback,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    if let Some(platform) = cli.platform {
        config.gateway.platform = platform;
    }
    if let Some(cert) = cli.cert {
        config.tls.cert_path = Some(cert);
    }
    if let Some(key) = cli.key {
        config.tls.key_path = Some(key);
    }

    let client_config = config.client_config().map_err(|e| {
        eprintln!("{}: {}", "Configuration error".red(), e);
        e
    })?;
    tracing::info!("Gateway: {}", client_config.gateway);
    let client = PushClient::new(client_config);

    match cli.command {
        Commands::Send {
            token,
            alert,
            badge,
            sound,
            expiration,
            priority,
            identifier,
            wait,
        } => {
            let token = hex::decode(token.trim()).map_err(|e| {
                eprintln!("{}: invalid device token: {}", "Error".red(), e);
                e
            })?;

            let mut payload = match alert {
                Some(text) => Payload::alert(text),
                None => Payload::default(),
            };
            if let Some(badge) = badge {
                payload = payload.with_badge(badge);
            }
            if let Some(sound) = sound {
                payload = payload.with_sound(sound);
            }

            let mut notification = Notification::new(token, payload);
            if let Some(secs) = expiration {
                let at: DateTime<Utc> = DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| format!("expiration out of range: {}", secs))?;
                notification = notification.with_expiration(at);
            }
            if let Some(priority) = priority {
                notification = notification.with_priority(priority);
            }
            if let Some(identifier) = identifier {
                notification = notification.with_identifier(identifier);
            }

            client.on_push_failed(|token, identifier, status| {
                eprintln!(
                    "{} {} (identifier: {}): {}",
                    "Rejected".red(),
                    hex::encode(token).cyan(),
                    identifier.unwrap_or("-"),
                    status.to_string().yellow()
                );
            });

            if let Err(e) = client.send(notification).await {
                eprintln!("{}: {}", "Send failed".red(), e);
                return Err(e.into());
            }
            println!("{}", "Sent".green());

            if !client.shutdown(Duration::from_secs(wait)).await {
                // The gateway never confirms delivery; silence is success.
                eprintln!("{}", format!("No rejection within {}s", wait).dimmed());
            }
        }
        Commands::Feedback => {
            let records = client.fetch_feedback().await.map_err(|e| {
                eprintln!("{}: {}", "Feedback failed".red(), e);
                e
            })?;

            if records.is_empty() {
                println!("{}", "No feedback".yellow());
            }
            for record in records {
                println!(
                    "{}  {}",
                    record.timestamp.to_rfc3339().dimmed(),
                    hex::encode(&record.token).cyan()
                );
            }
        }
    }

    Ok(())
}
