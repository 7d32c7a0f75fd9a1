//! CameraStream - per-camera ingestion worker
//!
//! ## Responsibilities
//!
//! - Connect to the source with a bounded number of attempts
//! - Read at the native rate and forward a subsample for detection
//! - Loop video files, reconnect live sources
//! - Report connection status transitions
//!
//! A stream runs until its cancellation token fires or its reconnect
//! attempts are exhausted. Every wait selects on the token.

mod source;

pub use source::{
    classify, ffmpeg_args, FfmpegOpener, FfmpegSource, FrameSource, SourceKind, SourceOpener,
    StaticImageSource,
};

use crate::camera_status_tracker::{CameraStatusTracker, StreamStatus, StreamStatusEvent};
use crate::config::StreamConfig;
use crate::detector::Detector;
use crate::error::Error;
use crate::frame;
use crate::models::{CameraSource, Frame};
use crate::violation_engine::ViolationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause after a failed static image read
const IMAGE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Why a stream worker returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// Cancelled
    Stopped,
    /// Gave up after consecutive failed attempts
    ReconnectExhausted { attempts: u32 },
}

/// Shared collaborators of all streams
#[derive(Clone)]
pub struct StreamDeps {
    pub opener: Arc<dyn SourceOpener>,
    pub detector: Arc<dyn Detector>,
    pub engine: Arc<ViolationEngine>,
    pub status: Arc<CameraStatusTracker>,
}

/// One camera ingestion worker
pub struct CameraStream {
    camera_id: String,
    locator: String,
    kind: SourceKind,
    config: StreamConfig,
    deps: StreamDeps,
}

impl CameraStream {
    pub fn new(camera: &CameraSource, config: StreamConfig, deps: StreamDeps) -> Self {
        Self {
            camera_id: camera.id.clone(),
            locator: camera.source.trim().to_string(),
            kind: classify(&camera.source),
            config,
            deps,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Run until cancelled or out of reconnect attempts
    pub async fn run(self, cancel: CancellationToken) -> StreamExit {
        tracing::info!(
            camera_id = %self.camera_id,
            source = %self.locator,
            kind = ?self.kind,
            "Camera stream started"
        );

        let exit = self.run_loop(&cancel).await;

        match exit {
            StreamExit::Stopped => {
                tracing::info!(camera_id = %self.camera_id, "Camera stream stopped");
            }
            StreamExit::ReconnectExhausted { attempts } => {
                self.report(StreamStatus::Failed).await;
                tracing::error!(
                    camera_id = %self.camera_id,
                    attempts = attempts,
                    "Max reconnection attempts reached, stopping stream"
                );
            }
        }
        exit
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> StreamExit {
        let stride = self.config.frame_stride();
        let mut attempts: u32 = 0;
        let mut read_count: u64 = 0;
        let mut source: Option<Box<dyn FrameSource>> = None;

        loop {
            if cancel.is_cancelled() {
                return StreamExit::Stopped;
            }

            if source.is_none() {
                if attempts >= self.config.max_reconnect_attempts {
                    return StreamExit::ReconnectExhausted { attempts };
                }

                tracing::info!(
                    camera_id = %self.camera_id,
                    attempt = attempts + 1,
                    "Connecting to camera"
                );

                let opened = tokio::select! {
                    _ = cancel.cancelled() => return StreamExit::Stopped,
                    r = self.deps.opener.open(self.kind, &self.locator, self.config.frame_size) => r,
                };

                match opened {
                    Ok(s) => {
                        tracing::info!(camera_id = %self.camera_id, "Camera connected");
                        attempts = 0;
                        self.report(StreamStatus::Online).await;
                        source = Some(s);
                    }
                    Err(e) if self.kind == SourceKind::StaticImage => {
                        tracing::error!(camera_id = %self.camera_id, error = %e, "Failed to load image");
                        if !sleep_or_cancel(cancel, IMAGE_RETRY_DELAY).await {
                            return StreamExit::Stopped;
                        }
                        continue;
                    }
                    Err(e) => {
                        attempts += 1;
                        let err = Error::connection(&self.camera_id, e.to_string());
                        tracing::warn!(error = %err, attempts = attempts, "Camera connection failed");
                        self.report(StreamStatus::Offline).await;
                        if !sleep_or_cancel(cancel, self.config.reconnect_delay).await {
                            return StreamExit::Stopped;
                        }
                        continue;
                    }
                }
            }

            let Some(src) = source.as_mut() else {
                continue;
            };

            let read = tokio::select! {
                _ = cancel.cancelled() => return StreamExit::Stopped,
                r = src.read_frame() => r,
            };

            let failure = match read {
                Ok(Some(frame)) => {
                    let pause = if self.kind == SourceKind::StaticImage {
                        // Still images are forwarded every iteration at the processing rate
                        if !self.process(frame, cancel).await {
                            return StreamExit::Stopped;
                        }
                        self.config.process_interval()
                    } else {
                        let forward = read_count % stride == 0;
                        read_count += 1;
                        if forward && !self.process(frame, cancel).await {
                            return StreamExit::Stopped;
                        }
                        self.config.read_interval()
                    };

                    if !sleep_or_cancel(cancel, pause).await {
                        return StreamExit::Stopped;
                    }
                    continue;
                }
                Ok(None) if self.kind == SourceKind::File => {
                    tracing::info!(camera_id = %self.camera_id, "Video ended, rewinding to start");
                    let rewound = tokio::select! {
                        _ = cancel.cancelled() => return StreamExit::Stopped,
                        r = src.rewind() => r,
                    };
                    match rewound {
                        Ok(()) => continue,
                        Err(e) => e,
                    }
                }
                Ok(None) => Error::Source("end of stream".to_string()),
                Err(e) => e,
            };

            if self.kind == SourceKind::StaticImage {
                tracing::error!(camera_id = %self.camera_id, error = %failure, "Failed to read image file");
                if !sleep_or_cancel(cancel, IMAGE_RETRY_DELAY).await {
                    return StreamExit::Stopped;
                }
                continue;
            }

            source = None;
            attempts += 1;
            tracing::warn!(
                camera_id = %self.camera_id,
                error = %failure,
                attempts = attempts,
                "Failed to read frame, reconnecting"
            );
            self.report(StreamStatus::Offline).await;
            if !sleep_or_cancel(cancel, self.config.reconnect_delay).await {
                return StreamExit::Stopped;
            }
        }
    }

    /// Record a status and log the transition, if any
    async fn report(&self, status: StreamStatus) {
        match self.deps.status.update(&self.camera_id, status).await {
            Some(StreamStatusEvent::Lost) => {
                tracing::warn!(camera_id = %self.camera_id, "Camera stream lost");
            }
            Some(StreamStatusEvent::Recovered) => {
                tracing::info!(camera_id = %self.camera_id, "Camera stream recovered");
            }
            Some(StreamStatusEvent::Terminated) => {
                tracing::error!(camera_id = %self.camera_id, "Camera stream terminated");
            }
            None => {}
        }
    }

    /// Resize, detect, evaluate; returns false if cancelled midway
    async fn process(&self, frame: Frame, cancel: &CancellationToken) -> bool {
        let frame = frame::resize_to(frame, self.config.frame_size);

        let detections = tokio::select! {
            _ = cancel.cancelled() => return false,
            d = self.deps.detector.detect(&frame) => d,
        };

        // An empty result may be a detector outage; it must not age trackers
        if detections.is_empty() {
            return true;
        }

        let alerts = self
            .deps
            .engine
            .process_frame(&self.camera_id, &frame, detections)
            .await;
        if !alerts.is_empty() {
            tracing::debug!(camera_id = %self.camera_id, alerts = alerts.len(), "Alerts raised");
        }
        true
    }
}

/// Sleep unless cancelled first; false if cancelled
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::FrameSize;
    use std::sync::atomic::Ordering;

    fn stream_config(max_attempts: u32) -> StreamConfig {
        StreamConfig {
            frame_size: FrameSize::new(8, 8),
            fps: 10,
            native_read_rate: 30,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: max_attempts,
        }
    }

    fn stream(
        source: &str,
        max_attempts: u32,
        opener: Arc<ScriptedOpener>,
        detector: Arc<CountingDetector>,
    ) -> (CameraStream, Arc<CameraStatusTracker>) {
        let status = Arc::new(CameraStatusTracker::new());
        let deps = StreamDeps {
            opener,
            detector,
            engine: engine(),
            status: status.clone(),
        };
        let stream = CameraStream::new(&CameraSource::new("cam1", source), stream_config(max_attempts), deps);
        (stream, status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_subsamples_read_frames() {
        let opener = Arc::new(ScriptedOpener::new(vec![Some((30, End::Error))]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, status) = stream("rtsp://cam/1", 1, opener.clone(), detector.clone());

        let exit = stream.run(CancellationToken::new()).await;

        assert_eq!(exit, StreamExit::ReconnectExhausted { attempts: 1 });
        // 30 frames at stride 3
        assert_eq!(detector.calls.load(Ordering::SeqCst), 10);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(status.get_status("cam1").await, StreamStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_exhaust_attempts() {
        let opener = Arc::new(ScriptedOpener::new(vec![]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, _) = stream("rtsp://cam/1", 3, opener.clone(), detector.clone());

        let exit = stream.run(CancellationToken::new()).await;

        assert_eq!(exit, StreamExit::ReconnectExhausted { attempts: 3 });
        assert_eq!(opener.opens.load(Ordering::SeqCst), 3);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_attempts() {
        let opener = Arc::new(ScriptedOpener::new(vec![None, None, Some((1, End::Error))]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, _) = stream("0", 3, opener.clone(), detector);

        let exit = stream.run(CancellationToken::new()).await;

        assert_eq!(exit, StreamExit::ReconnectExhausted { attempts: 3 });
        // fail, fail, ok (reset), read failure, fail, fail
        assert_eq!(opener.opens.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_end_rewinds_without_attempts() {
        let opener = Arc::new(ScriptedOpener::new(vec![Some((2, End::Eof))]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, status) = stream("/data/lab.mp4", 1, opener.clone(), detector.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), StreamExit::Stopped);
        assert!(opener.rewinds.load(Ordering::SeqCst) >= 5);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(detector.calls.load(Ordering::SeqCst) > 0);
        assert_eq!(status.get_status("cam1").await, StreamStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let opener = Arc::new(ScriptedOpener::new(vec![]));
        let detector = Arc::new(CountingDetector::default());
        let status = Arc::new(CameraStatusTracker::new());
        let mut config = stream_config(10);
        config.reconnect_delay = Duration::from_secs(3600);
        let deps = StreamDeps {
            opener: opener.clone(),
            detector,
            engine: engine(),
            status: status.clone(),
        };
        let stream = CameraStream::new(&CameraSource::new("cam1", "rtsp://cam/1"), config, deps);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), StreamExit::Stopped);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(status.get_status("cam1").await, StreamStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_read() {
        let opener = Arc::new(ScriptedOpener::new(vec![Some((0, End::Hang))]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, _) = stream("rtsp://cam/1", 1, opener, detector);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), StreamExit::Stopped);
    }

    async fn run_with_detector(detector: Arc<dyn Detector>, frames: usize) -> Arc<ViolationEngine> {
        let engine = engine();
        engine.set_active_session("s1", None).await;
        let deps = StreamDeps {
            opener: Arc::new(ScriptedOpener::new(vec![Some((frames, End::Error))])),
            detector,
            engine: engine.clone(),
            status: Arc::new(CameraStatusTracker::new()),
        };
        let stream = CameraStream::new(&CameraSource::new("cam1", "rtsp://cam/1"), stream_config(1), deps);
        stream.run(CancellationToken::new()).await;
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_detections_skip_engine() {
        let detector = Arc::new(CountingDetector::default());
        let engine = run_with_detector(detector.clone(), 9).await;

        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.stats().await.frames_processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_gap_does_not_reach_engine() {
        let detector = Arc::new(ScriptedDetector::new(vec![vec![person()], vec![], vec![person()]]));
        let engine = run_with_detector(detector.clone(), 9).await;

        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.stats().await.frames_processed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_image_processed_every_iteration() {
        let opener = Arc::new(ScriptedOpener::new(vec![Some((5, End::Error))]));
        let detector = Arc::new(CountingDetector::default());
        let (stream, _) = stream("/data/lab.png", 1, opener.clone(), detector.clone());
        assert_eq!(stream.kind(), SourceKind::StaticImage);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        // Read failures on images never count toward the reconnect ceiling
        assert_eq!(handle.await.unwrap(), StreamExit::Stopped);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 5);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    }
}
