use anyhow::Context;
use chrono::Utc;
use novu_email_log::config::Config;
use novu_email_log::store::{FileLogStore, LogStore};
use novu_email_log::{http_server, retention};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,novu_email_log=debug")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    if config.basic_auth.is_none() {
        tracing::warn!(
            "BASIC_AUTH_USER/BASIC_AUTH_PASS not set, viewer routes will reject every request"
        );
    }

    let store: Arc<dyn LogStore> = match &config.data_dir {
        Some(dir) => Arc::new(
            FileLogStore::open(dir.clone())
                .await
                .with_context(|| format!("failed to open webhook log in {}", dir.display()))?,
        ),
        None => {
            tracing::warn!("DATA_DIR not set, webhook log is kept in memory only");
            Arc::new(FileLogStore::in_memory())
        }
    };

    retention::sweep(store.as_ref(), Utc::now()).await;

    let app = http_server::router(&config, store);
    http_server::serve(config.bind_addr, app)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
