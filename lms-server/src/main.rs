//! lms-server - multi-tenant learning management backend
//!
//! Subcommands:
//! - `serve` (default): HTTP API on the configured address
//! - `create-tenant`: bootstrap a tenant from the command line
//! - `import`: run one import batch from a JSON or CSV file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lms_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use lms_common::events::EventBus;
use lms_server::import::{self, ImportOptions, InputFormat};
use lms_server::{build_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "lms-server";

/// Command-line arguments for lms-server
#[derive(Parser, Debug)]
#[command(name = "lms-server")]
#[command(about = "Multi-tenant learning management backend")]
#[command(version)]
struct Cli {
    /// Root folder holding lms.db (overrides LMS_ROOT_FOLDER and the config file)
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "LMS_BIND_ADDRESS")]
        bind: Option<String>,
        #[arg(short, long, env = "LMS_PORT")]
        port: Option<u16>,
    },
    /// Create a tenant
    CreateTenant {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        locale: Option<String>,
    },
    /// Import one file into a tenant
    Import {
        #[arg(long)]
        tenant: String,
        /// programs, courses, lessons, users or translations
        #[arg(long)]
        entity: String,
        #[arg(long)]
        dry_run: bool,
        /// JSON array or CSV with a header row (chosen by extension)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TomlConfig::load_or_default(MODULE_NAME);

    init_tracing(&config)?;

    // Build identification first, before any database delay
    info!(
        "Starting lms-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    info!("Root folder: {}", initializer.root_folder().display());

    let db = lms_server::db::open_database(&initializer)
        .await
        .context("Failed to open database")?;
    let event_bus = EventBus::new(256);
    let state = AppState::new(db, event_bus, config);

    match cli.command.unwrap_or(Command::Serve { bind: None, port: None }) {
        Command::Serve { bind, port } => serve(state, bind, port).await,
        Command::CreateTenant { slug, name, locale } => {
            let locale = locale.or_else(|| state.config.default_locale.clone());
            let tenant = state
                .services
                .identity
                .create_tenant(&slug, &name, locale.as_deref())
                .await?;
            info!(tenant_id = tenant.id, slug = %tenant.slug, "Tenant created");
            println!("{}", serde_json::to_string_pretty(&tenant)?);
            Ok(())
        }
        Command::Import {
            tenant,
            entity,
            dry_run,
            file,
        } => run_import(state, &tenant, &entity, dry_run, file).await,
    }
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn serve(state: AppState, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| state.config.http.bind_address.clone());
    let port = port.unwrap_or(state.config.http.port);
    let addr = format!("{}:{}", bind, port);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_import(state: AppState, tenant: &str, entity: &str, dry_run: bool, file: PathBuf) -> Result<()> {
    let tenant = state.services.identity.find_tenant(tenant).await?;
    let payload = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let rows = import::parse(InputFormat::from_path(&file), &payload).map_err(anyhow::Error::msg)?;
    let report = state
        .services
        .imports
        .import_for_tenant(tenant.id, None, entity, rows, ImportOptions { dry_run })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Graceful shutdown signal handler
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
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
