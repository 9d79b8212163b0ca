mod arrival_state;
mod builder;
mod car_collector;
mod collector;
mod config;
mod db_fetcher;
mod db_parser;
mod dedup;
mod error;
mod fetcher;
mod manager;
mod matcher;
mod merge;
mod observation;
mod store;
mod webui;

use crate::config::Config;
use crate::manager::{CollectionManager, Manager};
use crate::webui::WebUiState;

use tracing::info;

#[tokio::main]
async fn main() -> Result<(), error::Error> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./config.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} routes from {}", config.routes.len(), config_path);

    let tz = config.tz()?;
    let webui = config.webui.enabled.then(|| WebUiState {
        database_path: config.database_path.clone(),
        tz,
        window: config.matching.capture_window(),
        history_days: config.webui.history_days,
    });

    let mut manager = CollectionManager::new(config)?;

    match webui {
        Some(state) => {
            tokio::try_join!(manager.run(), webui::rocket(state))?;
        }
        None => manager.run().await?,
    }

    Ok(())
}
