use std::sync::Arc;

use be_version_service::{
    SnapshotStore, Updater, UpdaterHandle, evaluator::threshold_from_std, init_query_service,
};

pub mod config;
pub mod error;
pub mod fetcher;
pub mod tools;

pub use config::ServerConfig;
pub use error::{MonolithError, Result};
pub use fetcher::HttpFetcher;

/// Serve the query API and, unless disabled, run the refresh scheduler until
/// `shutdown` fires.
pub async fn run_server(
    config: ServerConfig,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) -> Result<()> {
    let router = init_query_service(
        config.data_dir.clone(),
        threshold_from_std(config.stale_threshold),
    );

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .map_err(|source| MonolithError::Bind {
            addr: config.http_addr,
            source,
        })?;
    tracing::info!("Starting HTTP server at {}", config.http_addr);

    let updater = if config.scheduler_enabled {
        Some(start_updater(&config)?)
    } else {
        tracing::info!("Scheduler disabled, serving documents as found on disk");
        None
    };

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            tracing::info!("Shutting down HTTP server...");
        })
        .await;

    if let Some(handle) = updater {
        handle.stop().await;
    }

    served.map_err(MonolithError::Serve)
}

fn start_updater(config: &ServerConfig) -> Result<UpdaterHandle> {
    let tools_file = tools::load_tools_file(&config.tools_config_path)?;
    let fetcher = Arc::new(HttpFetcher::new(
        &tools_file.tools,
        config.update_info_url.clone(),
        config.fetch_timeout,
    )?);

    let mut updater = Updater::new(
        SnapshotStore::new(config.data_dir.clone()),
        tools_file.tracked(),
        fetcher.clone(),
        config.updater_config(),
    );
    if config.update_info_url.is_some() {
        updater = updater.with_update_source(fetcher);
    }

    tracing::info!(
        "Tracking {} tools, data directory {}",
        updater.tools().len(),
        config.data_dir.display()
    );
    Ok(Arc::new(updater).start())
}
