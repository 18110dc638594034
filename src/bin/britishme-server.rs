use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use britishme::config::{Env, ServerArgs, ServerConfig};
use britishme::{
    ArtifactStore, GeminiImageClient, QuotaTracker, Studio, StudioHttpState, logging, router,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    let env = Env::load(&args.dotenv)?;
    let config = ServerConfig::from_args(args, &env)?;
    logging::init_tracing(config.json_logs)?;

    let generator = GeminiImageClient::new(config.api_key.clone(), config.upstream_timeout)?
        .with_base_url(config.gemini_base_url.clone())
        .with_model(config.gemini_model.clone());
    let artifacts = Arc::new(ArtifactStore::open_dir(&config.output_dir).await?);

    let studio = Studio::new(Arc::new(generator), artifacts)
        .with_quota(QuotaTracker::new(config.quota.clone()))
        .with_retention(config.retention);
    let state = StudioHttpState::new(studio).with_max_upload_bytes(config.max_upload_bytes);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(
        listen = %config.listen,
        output_dir = %config.output_dir.display(),
        model = %config.gemini_model,
        max_requests = config.quota.max_requests,
        window_secs = config.quota.window_seconds,
        retention_secs = config.retention.as_secs(),
        "britishme-server listening"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    tracing::info!("britishme-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
