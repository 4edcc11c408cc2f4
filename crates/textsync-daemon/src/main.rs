//! textsync: relay, content API and editing client for one shared document.
//!
//! `textsync serve` runs the relay and the content API. `textsync edit`
//! joins as a writer, editing from the console or through a mirrored file.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use textsync_core::{
    DocumentStore, EngineEvent, InMemoryStore, Session, SessionConfig, SessionId, DEFAULT_CONTENT,
};
use textsync_daemon::api::{self, ApiState};
use textsync_daemon::{console, watcher, FileStore, HttpStore, RelayClient, RelayServer, SyncLoop};

#[derive(Parser, Debug)]
#[command(name = "textsync")]
#[command(about = "Operation-based synchronization of one shared text document")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true, env = "TEXTSYNC_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay and the content API
    Serve(ServeArgs),
    /// Join a relay as a writer
    Edit(EditArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address for the WebSocket relay
    #[arg(long, default_value = "0.0.0.0:8080", env = "TEXTSYNC_RELAY_LISTEN")]
    relay_listen: String,

    /// Address for the content API
    #[arg(long, default_value = "0.0.0.0:8081", env = "TEXTSYNC_API_LISTEN")]
    api_listen: String,

    /// File the document is stored in (kept in memory when omitted)
    #[arg(long, env = "TEXTSYNC_DATA")]
    data: Option<PathBuf>,

    /// Do not send frames back to the writer that sent them
    #[arg(long, env = "TEXTSYNC_NO_ECHO")]
    no_echo: bool,

    /// Content served while nothing is stored
    #[arg(long, default_value = DEFAULT_CONTENT, env = "TEXTSYNC_DEFAULT_CONTENT")]
    default_content: String,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Relay URL
    #[arg(long, default_value = "ws://localhost:8080", env = "TEXTSYNC_RELAY")]
    relay: String,

    /// Content API URL
    #[arg(long, default_value = "http://localhost:8081/api/doc", env = "TEXTSYNC_API")]
    api: String,

    /// Mirror the document to this file instead of using the console
    #[arg(long, env = "TEXTSYNC_FILE")]
    file: Option<PathBuf>,

    /// Activity log entries kept
    #[arg(long, default_value_t = 500, env = "TEXTSYNC_LOG_CAPACITY")]
    log_capacity: usize,

    /// Bound on unconfirmed sends (unbounded when omitted)
    #[arg(long, env = "TEXTSYNC_MAX_PENDING")]
    max_pending: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG; stderr keeps the console surface clean
    let default_filter = if cli.verbose {
        "debug,tower_http=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Edit(args) => edit(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store: Arc<dyn DocumentStore> = match &args.data {
        Some(path) => {
            info!("Storing document in {}", path.display());
            Arc::new(FileStore::new(path.clone()))
        }
        None => {
            info!("Storing document in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let state = Arc::new(ApiState {
        store,
        default_content: args.default_content,
    });
    api::seed(&state).await?;

    let api_listener = tokio::net::TcpListener::bind(&args.api_listen).await?;
    info!("Content API listening on {}{}", api_listener.local_addr()?, api::DOC_PATH);

    let relay_listener = RelayServer::bind(&args.relay_listen).await?;
    let relay = RelayServer::new(!args.no_echo);
    if args.no_echo {
        info!("Relay will not echo frames to their sender");
    }

    let app = api::router(state);

    tokio::select! {
        result = relay.run(relay_listener) => result?,
        result = axum::serve(api_listener, app).into_future() => result?,
        _ = shutdown_signal() => {}
    }

    info!("Shutting down");
    Ok(())
}

async fn edit(args: EditArgs) -> Result<()> {
    let session_id = SessionId::generate();
    info!("Session {} editing via {}", session_id, args.relay);

    let store = Arc::new(HttpStore::new(&args.api)?);
    info!("Document stored via {}", store.url());

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let mut relay = RelayClient::new(&args.relay);
    if let Err(e) = relay.connect(relay_tx).await {
        warn!("Relay unavailable, edits stay local: {}", e);
    }

    let config = SessionConfig {
        log_capacity: args.log_capacity,
        max_pending: args.max_pending,
        ..Default::default()
    };
    let session = Session::new(config, session_id);

    let (surface_tx, surface_rx) = mpsc::unbounded_channel();
    let sync = SyncLoop::new(session, store, Arc::new(relay), surface_tx).with_relay_events(relay_rx);

    let _events = sync.events().subscribe(|event: EngineEvent| {
        if let Ok(json) = serde_json::to_string(&event) {
            debug!(target: "textsync::events", "{}", json);
        }
    });

    let (local_tx, local_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(sync.run(local_rx));

    let surface = async move {
        match args.file {
            Some(path) => watcher::run_file_surface(path, local_tx, surface_rx).await,
            None => console::run(local_tx, surface_rx).await,
        }
    };

    tokio::select! {
        result = surface => result?,
        _ = shutdown_signal() => {}
    }

    // The surface dropped its sender, so the driver drains and stops
    let session = driver.await?;
    info!(
        "Session ended with {} chars, {} unconfirmed send(s)",
        session.buffer().chars().count(),
        session.pending_len()
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
