use anyhow::{Context, Result};
use ocea_exporter::api::ApiClient;
use ocea_exporter::auth::{Credentials, TokenManager, TokenProvider};
use ocea_exporter::metrics::{Metrics, spawn_exporter};
use ocea_exporter::state::StateStore;
use ocea_exporter::{Config, CounterFetcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the only argument
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let mut config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    config.apply_env_overrides()?;
    config.validate().context("Invalid configuration")?;

    ocea_exporter::logging::init_logging(&config.logging)?;
    info!(
        "Ocea exporter {} starting up",
        option_env!("APP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
    );

    let tokens: Arc<dyn TokenProvider> = Arc::new(TokenManager::new(
        config.auth.clone(),
        Credentials::from(&config.credentials),
    )?);
    let api = Arc::new(ApiClient::new(&config.api, tokens)?);
    let store = StateStore::new(config.state.file.clone());

    let metrics = Arc::new(Metrics::new()?);
    let mut fetcher =
        CounterFetcher::new(&config, api, store)?.with_metrics(Arc::clone(&metrics));
    let exporter = spawn_exporter(Arc::clone(&metrics), fetcher.register_listener());

    let web_task = if cfg!(feature = "web") && config.metrics.enabled {
        let addr = config.metrics_addr()?;
        let state = ocea_exporter::web::AppState {
            metrics: Arc::clone(&metrics),
            status: fetcher.status(),
        };
        Some(tokio::spawn(async move {
            if let Err(e) = ocea_exporter::web::serve(state, addr).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    fetcher
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("Fetch loop stopped, shutting down");
    if let Some(task) = web_task {
        task.abort();
    }
    exporter.abort();
    Ok(())
}
