//! EdgeController - service orchestration
//!
//! Wires detector, backend adapter, violation engine, camera manager and
//! session poller from `AppConfig`, and owns their start/stop order.

use crate::camera_manager::CameraManager;
use crate::camera_status_tracker::CameraStatusTracker;
use crate::camera_stream::{FfmpegOpener, SourceOpener, StreamDeps};
use crate::cloud_sync::CloudSync;
use crate::config::AppConfig;
use crate::detector::{Detector, HttpDetector, MockDetector};
use crate::error::Result;
use crate::session_control::SessionPoller;
use crate::violation_engine::{AlertSink, AlertUpload, ViolationEngine};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Alert sink used when no backend is configured
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn upload(&self, alert: AlertUpload) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tracing::warn!(
                session_id = %alert.session_id,
                camera_id = %alert.camera_id,
                person_id = %alert.person_id,
                missing_ppe = %alert.missing_ppe,
                snapshot_bytes = alert.image_jpeg.len(),
                "Violation (no backend configured)"
            );
            Ok(())
        })
    }
}

struct PollerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Edge controller service
pub struct EdgeController {
    config: AppConfig,
    engine: Arc<ViolationEngine>,
    manager: CameraManager,
    cloud: Option<Arc<CloudSync>>,
    poller: Option<Arc<SessionPoller>>,
    poller_task: Mutex<Option<PollerTask>>,
    running: Mutex<bool>,
}

impl EdgeController {
    /// Build all components from configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let detector: Arc<dyn Detector> = if config.use_mock_detector {
            tracing::warn!("Using mock detector");
            Arc::new(MockDetector)
        } else {
            Arc::new(HttpDetector::new(
                config.detector_url.clone(),
                config.detector_endpoint.clone(),
                config.detector_timeout(),
            )?)
        };

        let cloud = match (&config.supabase_url, &config.supabase_key) {
            (Some(url), Some(key)) => Some(Arc::new(CloudSync::new(
                url.clone(),
                key.clone(),
                config.snapshot_storage_bucket.clone(),
                config.detector_timeout().max(std::time::Duration::from_secs(10)),
            )?)),
            _ => {
                tracing::warn!("Backend not configured, alerts are logged only and sessions are not polled");
                None
            }
        };

        let sink: Arc<dyn AlertSink> = match &cloud {
            Some(cloud) => cloud.clone() as Arc<dyn AlertSink>,
            None => Arc::new(LogAlertSink),
        };

        Ok(Self::with_components(config, detector, Arc::new(FfmpegOpener), sink, cloud))
    }

    /// Assemble from explicit collaborators
    pub fn with_components(
        config: AppConfig,
        detector: Arc<dyn Detector>,
        opener: Arc<dyn SourceOpener>,
        sink: Arc<dyn AlertSink>,
        cloud: Option<Arc<CloudSync>>,
    ) -> Self {
        let engine = Arc::new(ViolationEngine::new(config.engine_config(), sink));

        let deps = StreamDeps {
            opener,
            detector,
            engine: engine.clone(),
            status: Arc::new(CameraStatusTracker::new()),
        };
        let manager = CameraManager::new(config.cameras.clone(), config.stream_config(), deps);

        let poller = cloud.as_ref().map(|cloud| {
            Arc::new(SessionPoller::new(
                cloud.clone(),
                engine.clone(),
                config.session_poll_interval(),
            ))
        });

        Self {
            config,
            engine,
            manager,
            cloud,
            poller,
            poller_task: Mutex::new(None),
            running: Mutex::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<ViolationEngine> {
        &self.engine
    }

    pub fn camera_manager(&self) -> &CameraManager {
        &self.manager
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Start session polling, then the camera streams
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if *running {
            tracing::warn!("Service is already running");
            return;
        }

        tracing::info!(cameras = self.config.cameras.len(), "Starting edge controller");

        if let Some(poller) = &self.poller {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(poller.clone().run(cancel.clone()));
            *self.poller_task.lock().await = Some(PollerTask { cancel, handle });
        }

        self.manager.start_all().await;
        *running = true;
        tracing::info!("Edge controller started");
    }

    /// Stop cameras, stop polling and release the current session
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if !*running {
            return;
        }

        tracing::info!("Stopping edge controller");
        let grace = self.config.shutdown_grace();

        self.manager.stop_all(grace).await;

        if let Some(mut task) = self.poller_task.lock().await.take() {
            task.cancel.cancel();
            if tokio::time::timeout(grace, &mut task.handle).await.is_err() {
                tracing::warn!("Session poller did not stop in time, aborting");
                task.handle.abort();
            }
        }

        if let (Some(cloud), Some(poller)) = (&self.cloud, &self.poller) {
            if let Some(session_id) = poller.current_session_id().await {
                tracing::info!(session_id = %session_id, "Gracefully stopping session");
                match tokio::time::timeout(grace, cloud.mark_session_stopped(&session_id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Failed to update session status on stop");
                    }
                    Err(_) => {
                        tracing::error!("Timed out updating session status on stop");
                    }
                }
            }
        }

        self.engine.clear_active_session().await;
        *running = false;

        let stats = self.engine.stats().await;
        tracing::info!(
            frames_processed = stats.frames_processed,
            alerts_emitted = stats.alerts_emitted,
            "Edge controller stopped"
        );
    }
}
