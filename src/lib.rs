//! Inkwell POS - order and payment backend for a print shop.
//!
//! A single-process HTTP service: SQLite persistence, cookie/bearer
//! authentication, order and payment management with WhatsApp
//! notifications, expense tracking, and financial report exports.
//! `run()` wires everything together; `main.rs` only parses the CLI.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod catalog;
mod customers;
mod db;
mod expenses;
mod export;
mod notifications;
mod orders;
mod payments;
mod reports;
mod routes;
mod uploads;
mod wagateway;

/// Log files older than this are pruned at startup.
const LOG_RETENTION_DAYS: u64 = 14;
/// Notification dispatcher tick interval.
const NOTIFIER_INTERVAL_SECS: u64 = 15;

/// Pull the first non-empty string out of a JSON object by key.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Server configuration, filled in by the CLI layer.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub no_notifier: bool,
}

/// Delete log files older than the retention window.
fn prune_old_logs(log_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };
    let cutoff = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("pos."));
        if !is_log {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > cutoff);
        if stale {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Initialize structured logging (console + daily-rolling file).
fn init_logging(data_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,inkwell_pos_lib=debug"));

    let log_dir = data_dir.join("logs");
    prune_old_logs(&log_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pos");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the process — dropping it
    // flushes logs. We leak it intentionally since the server runs until exit.
    std::mem::forget(guard);
}

/// Start the server and block until it exits.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_logging(&config.data_dir);
    info!("Starting Inkwell POS v{}", env!("CARGO_PKG_VERSION"));

    // Main DB connection for HTTP handlers
    let db = Arc::new(db::init(&config.data_dir).map_err(anyhow::Error::msg)?);

    // First boot: make sure someone can log in
    let admin_password = std::env::var("POS_ADMIN_PASSWORD").ok();
    if let Some(generated) = auth::ensure_admin_account(&db, admin_password.as_deref())
        .map_err(anyhow::Error::msg)?
    {
        warn!(
            "Generated initial admin password for admin@inkwell.local: {generated} — change it"
        );
    }

    // Second DB connection for the background notification worker
    if config.no_notifier {
        info!("Notification worker disabled (--no-notifier)");
    } else {
        let db_for_notifier =
            Arc::new(db::init(&config.data_dir).map_err(anyhow::Error::msg)?);
        notifications::start_notification_worker(
            db_for_notifier,
            wagateway::Gateway::from_env(),
            NOTIFIER_INTERVAL_SECS,
        );
    }

    let uploads = Arc::new(uploads::UploadStore::new(config.data_dir.join("uploads")));
    let state = routes::AppState {
        db,
        auth: Arc::new(auth::AuthState::new()),
        uploads,
    };
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
