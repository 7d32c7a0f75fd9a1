//! CameraManager - stream worker lifecycle
//!
//! ## Responsibilities
//!
//! - Spawn one worker per enabled camera source
//! - Cooperative shutdown bounded by a grace period
//! - Running worker bookkeeping
//! - Report cameras left offline at shutdown

use crate::camera_status_tracker::CameraStatusTracker;
use crate::camera_stream::{CameraStream, StreamDeps, StreamExit};
use crate::config::StreamConfig;
use crate::models::CameraSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<StreamExit>,
}

/// CameraManager instance
pub struct CameraManager {
    cameras: Vec<CameraSource>,
    config: StreamConfig,
    deps: StreamDeps,
    /// None until started
    workers: Mutex<Option<HashMap<String, Worker>>>,
}

impl CameraManager {
    pub fn new(cameras: Vec<CameraSource>, config: StreamConfig, deps: StreamDeps) -> Self {
        Self {
            cameras,
            config,
            deps,
            workers: Mutex::new(None),
        }
    }

    /// Spawn a worker per enabled source; returns how many were started
    ///
    /// Calling again while running does nothing.
    pub async fn start_all(&self) -> usize {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            tracing::warn!("Camera streams already running");
            return 0;
        }

        let mut started = HashMap::new();
        for camera in &self.cameras {
            if !camera.enabled {
                tracing::info!(camera_id = %camera.id, "Camera disabled, skipping");
                continue;
            }

            let cancel = CancellationToken::new();
            let stream = CameraStream::new(camera, self.config.clone(), self.deps.clone());
            let handle = tokio::spawn(stream.run(cancel.clone()));
            started.insert(camera.id.clone(), Worker { cancel, handle });
        }

        let count = started.len();
        tracing::info!(cameras = count, "Camera streams started");
        *workers = Some(started);
        count
    }

    /// Cancel every worker and wait up to `grace` for them to finish
    ///
    /// Workers still running at the deadline are aborted.
    pub async fn stop_all(&self, grace: Duration) {
        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };

        tracing::info!(cameras = workers.len(), "Stopping camera streams");
        for worker in workers.values() {
            worker.cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + grace;
        for (camera_id, mut worker) in workers {
            match tokio::time::timeout_at(deadline, &mut worker.handle).await {
                Ok(Ok(exit)) => {
                    tracing::debug!(camera_id = %camera_id, exit = ?exit, "Camera worker finished");
                }
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    tracing::error!(camera_id = %camera_id, error = %e, "Camera worker panicked");
                }
                Err(_) => {
                    tracing::warn!(camera_id = %camera_id, "Camera worker did not stop in time, aborting");
                    worker.handle.abort();
                }
            }
        }

        let unavailable = self.deps.status.get_offline_cameras().await;
        if !unavailable.is_empty() {
            tracing::warn!(cameras = ?unavailable, "Cameras unavailable at shutdown");
        }
        self.deps.status.clear().await;

        tracing::info!("All camera streams stopped");
    }

    /// Ids of cameras whose worker is still running
    pub async fn running_cameras(&self) -> Vec<String> {
        let workers = self.workers.lock().await;
        let mut ids: Vec<String> = workers
            .iter()
            .flat_map(|w| w.iter())
            .filter(|(_, worker)| !worker.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self, camera_id: &str) -> bool {
        self.workers
            .lock()
            .await
            .as_ref()
            .and_then(|w| w.get(camera_id))
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn status_tracker(&self) -> &Arc<CameraStatusTracker> {
        &self.deps.status
    }
}
