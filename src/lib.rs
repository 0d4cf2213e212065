// Mediadeck - floating media deck core
// Module declarations
pub mod activity;
pub mod commands;
pub mod db;
pub mod events;
pub mod library;
pub mod notify;
pub mod playback;
pub mod queue;
pub mod realtime;
pub mod service;
pub mod settings;
pub mod state;
pub mod timer;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use db::connection::DatabaseConnection;
use events::EventBus;
use notify::{Notifier, TracingNotifier};
use playback::HttpMediaDisplay;
use settings::{JsonFileBackend, SettingsBackend, SettingsStore, SqliteBackend, EXTENSION_KEY};
use state::AppState;

/// Overrides the data directory
pub const DATA_DIR_ENV: &str = "MEDIADECK_DATA_DIR";

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mediadeck=info,mediadeck_lib=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Where settings live
pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("mediadeck"))
        .context("no data directory for this platform; set MEDIADECK_DATA_DIR")
}

/// Primary store is SQLite; the JSON file takes over if it cannot open or fails later.
fn open_settings(data_dir: &Path, bus: EventBus, notifier: Arc<dyn Notifier>) -> Arc<SettingsStore> {
    let json: Box<dyn SettingsBackend> = Box::new(JsonFileBackend::new(data_dir.to_path_buf()));
    let (primary, fallback): (Box<dyn SettingsBackend>, Option<Box<dyn SettingsBackend>>) =
        match DatabaseConnection::new(data_dir.join("mediadeck.db")) {
            Ok(db) => (Box::new(SqliteBackend::new(db)), Some(json)),
            Err(e) => {
                warn!("settings database unavailable ({}), using the JSON file", e);
                (json, None)
            }
        };
    SettingsStore::open(EXTENSION_KEY, primary, fallback, bus, notifier)
}

/// Run a headless session against the configured media server until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    info!("data directory: {}", data_dir.display());

    let bus = EventBus::new();
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let settings = open_settings(&data_dir, bus.clone(), Arc::clone(&notifier));

    let report = settings.migrate();
    if report.changed {
        info!("settings migrated {} -> {}", report.from, report.to);
    }

    let state = AppState::new(
        bus,
        settings,
        notifier,
        Arc::new(HttpMediaDisplay::new()),
        data_dir,
    );
    state.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("interrupted, shutting down");
    state.shutdown();
    Ok(())
}
