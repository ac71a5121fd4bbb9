use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use booru_client::BooruClient;
use boorumirror_common::Config;
use boorumirror_store::PgMirrorStore;
use boorumirror_sync::CatchUpSync;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Booru mirror starting...");

    // Load config
    let config = Config::from_env();
    config.log_redacted();

    // Connect to Postgres and run migrations
    let store = PgMirrorStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let store = Arc::new(store);

    let remote = Arc::new(BooruClient::new(
        config.booru_base_url.clone(),
        config.booru_user_agent.clone(),
    ));

    let mut sync = CatchUpSync::recover(remote, store, config.sync_page_size).await?;

    // The awaited loop serializes ticks; a slow page simply delays the next
    // interval rather than overlapping it.
    let mut ticker = tokio::time::interval(Duration::from_secs(config.sync_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sync.tick().await {
            Ok(outcome) => {
                info!(?outcome, watermark = sync.watermark(), "Tick complete")
            }
            Err(e) => {
                error!(error = %e, watermark = sync.watermark(), "Tick failed, page rolled back")
            }
        }
    }
}
