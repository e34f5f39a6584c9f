//! # coms
//!
//! Command-line client: print broadcasts from a server, or send a single
//! transaction and print its progress and outcome.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use coms_client::{BroadcastEvent, Client, Envelope, EventKind, handler};
use coms_core::constants::{NAME, VERSION};
use coms_settings::ComsSettings;
use tokio::sync::Notify;

/// Multiplexed request/response client.
#[derive(Parser, Debug)]
#[command(name = NAME, version = VERSION, about = "Talk to a coms server over one websocket")]
struct Cli {
    /// Server endpoint (`http`, `https`, `ws` or `wss`). Overrides settings.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Session token appended to the transport URL. Overrides settings.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Log level (`RUST_LOG` still wins). Overrides settings.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Settings file (defaults to `~/.coms/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every broadcast until the server closes or Ctrl-C.
    Listen,
    /// Send one request and wait for its outcome.
    Send {
        /// Payload type name of the request.
        #[arg(long)]
        payload_type: String,

        /// Target instance id.
        #[arg(long, default_value = "")]
        instance: String,

        /// Payload, sent as UTF-8 bytes.
        #[arg(long, default_value = "")]
        payload: String,
    },
}

fn load_settings(args: &Cli) -> Result<ComsSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(coms_settings::settings_path);
    let mut settings = coms_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = Some(endpoint.clone());
    }
    if let Some(session) = &args.session {
        settings.session_token = Some(session.clone());
    }
    if let Some(level) = &args.log_level {
        settings.logging.level = level.clone();
    }
    Ok(settings)
}

/// Load settings once and publish them as the process-wide settings.
fn install_settings(args: &Cli) -> Result<&'static ComsSettings> {
    let settings = load_settings(args)?;
    if coms_settings::init_settings(settings).is_err() {
        tracing::debug!("settings already initialized");
    }
    Ok(coms_settings::get_settings())
}

fn describe(envelope: &Envelope) -> String {
    let mut parts = vec![format!("#{}", envelope.id), envelope.status.to_string()];
    if !envelope.payload_type.is_empty() {
        parts.push(envelope.payload_type.clone());
    }
    if !envelope.instance_id.is_empty() {
        parts.push(format!("[{}]", envelope.instance_id));
    }
    if let Some(error) = &envelope.error {
        parts.push(error.to_string());
    } else if !envelope.payload.is_empty() {
        parts.push(String::from_utf8_lossy(&envelope.payload).into_owned());
    }
    parts.join(" ")
}

async fn listen(client: &Client) -> Result<()> {
    client.subscribe(
        EventKind::Broadcast,
        handler(|event| {
            if let BroadcastEvent::Broadcast(envelope) = event {
                println!("{}", describe(envelope));
            }
        }),
    );

    let closed = Arc::new(Notify::new());
    let on_close = Arc::clone(&closed);
    client.subscribe(
        EventKind::Close,
        handler(move |event| {
            if let BroadcastEvent::Close(info) = event {
                tracing::info!(%info, "server closed the connection");
            }
            on_close.notify_one();
        }),
    );

    tokio::select! {
        () = closed.notified() => Ok(()),
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            client.close().await.context("Failed to close connection")?;
            Ok(())
        }
    }
}

async fn send(client: &Client, request: Envelope) -> Result<()> {
    let reply = client
        .send(request, |progress| println!("{}", describe(progress)))
        .await;
    match reply {
        Ok(envelope) => {
            println!("{}", describe(&envelope));
            let _ = client.close().await;
            Ok(())
        }
        Err(e) => {
            let _ = client.close().await;
            Err(e).context("Transaction failed")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = install_settings(&args)?;

    coms_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::info!(version = VERSION, "{NAME} starting");

    if settings.endpoint.is_none() {
        bail!("No endpoint configured; pass --endpoint or set COMS_ENDPOINT");
    }
    let client = Client::from_settings(settings).context("Invalid endpoint")?;
    client
        .connect(settings.session_token.as_deref())
        .await
        .context("Failed to connect")?;

    match args.command {
        Command::Listen => listen(&client).await,
        Command::Send {
            payload_type,
            instance,
            payload,
        } => {
            let request = Envelope::request(payload_type, payload.into_bytes()).with_instance(instance);
            send(&client, request).await
        }
    }
}
