//! PPE Edge Controller
//!
//! Main entry point for the edge controller service.

use ppe_edge::{AppConfig, EdgeController};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ppe_edge={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PPE Edge Controller v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        cameras = config.cameras.len(),
        frame_width = config.frame_size.width,
        frame_height = config.frame_size.height,
        fps = config.fps,
        detector_url = %config.detector_url,
        mock_detector = config.use_mock_detector,
        backend = config.supabase_url.is_some(),
        "Configuration loaded"
    );

    let controller = EdgeController::from_config(config)?;
    controller.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    controller.stop().await;
    Ok(())
}
