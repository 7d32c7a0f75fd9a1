//! Camera Status Tracker
//!
//! Tracks the connection status of each camera stream and reports
//! transitions, so a flapping source is logged once per change.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Stream connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Never connected
    Unknown,
    /// Source open and delivering frames
    Online,
    /// Disconnected, reconnect pending
    Offline,
    /// Reconnect attempts exhausted; the stream has stopped
    Failed,
}

/// Status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatusEvent {
    /// Stream went Online -> Offline, or failed its first connection
    Lost,
    /// Stream went Offline -> Online
    Recovered,
    /// Stream gave up
    Terminated,
}

/// Tracks stream status per camera and detects transitions
pub struct CameraStatusTracker {
    statuses: RwLock<HashMap<String, StreamStatus>>,
}

impl CameraStatusTracker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Record a new status and return the transition event, if any
    pub async fn update(&self, camera_id: &str, status: StreamStatus) -> Option<StreamStatusEvent> {
        let mut statuses = self.statuses.write().await;
        let prev = statuses
            .insert(camera_id.to_string(), status)
            .unwrap_or(StreamStatus::Unknown);

        match (prev, status) {
            (StreamStatus::Online | StreamStatus::Unknown, StreamStatus::Offline) => {
                Some(StreamStatusEvent::Lost)
            }
            (StreamStatus::Offline, StreamStatus::Online) => Some(StreamStatusEvent::Recovered),
            (prev, StreamStatus::Failed) if prev != StreamStatus::Failed => {
                Some(StreamStatusEvent::Terminated)
            }
            _ => None,
        }
    }

    pub async fn get_status(&self, camera_id: &str) -> StreamStatus {
        self.statuses
            .read()
            .await
            .get(camera_id)
            .copied()
            .unwrap_or(StreamStatus::Unknown)
    }

    /// Snapshot of all statuses, sorted by camera id
    pub async fn all(&self) -> Vec<(String, StreamStatus)> {
        let mut all: Vec<(String, StreamStatus)> = self
            .statuses
            .read()
            .await
            .iter()
            .map(|(id, status)| (id.clone(), *status))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn get_offline_cameras(&self) -> Vec<String> {
        self.all()
            .await
            .into_iter()
            .filter(|(_, status)| matches!(status, StreamStatus::Offline | StreamStatus::Failed))
            .map(|(id, _)| id)
            .collect()
    }

    /// Clear all status on shutdown
    pub async fn clear(&self) {
        self.statuses.write().await.clear();
    }
}

impl Default for CameraStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_online_no_event() {
        let tracker = CameraStatusTracker::new();
        assert!(tracker.update("cam1", StreamStatus::Online).await.is_none());
        assert_eq!(tracker.get_status("cam1").await, StreamStatus::Online);
    }

    #[tokio::test]
    async fn test_initial_offline_triggers_lost() {
        let tracker = CameraStatusTracker::new();
        let event = tracker.update("cam1", StreamStatus::Offline).await;
        assert_eq!(event, Some(StreamStatusEvent::Lost));
    }

    #[tokio::test]
    async fn test_lost_and_recovered() {
        let tracker = CameraStatusTracker::new();
        tracker.update("cam1", StreamStatus::Online).await;
        assert_eq!(
            tracker.update("cam1", StreamStatus::Offline).await,
            Some(StreamStatusEvent::Lost)
        );
        assert!(tracker.update("cam1", StreamStatus::Offline).await.is_none());
        assert_eq!(
            tracker.update("cam1", StreamStatus::Online).await,
            Some(StreamStatusEvent::Recovered)
        );
    }

    #[tokio::test]
    async fn test_failed_reported_once() {
        let tracker = CameraStatusTracker::new();
        tracker.update("cam1", StreamStatus::Offline).await;
        assert_eq!(
            tracker.update("cam1", StreamStatus::Failed).await,
            Some(StreamStatusEvent::Terminated)
        );
        assert!(tracker.update("cam1", StreamStatus::Failed).await.is_none());
        assert_eq!(tracker.get_offline_cameras().await, vec!["cam1".to_string()]);
    }

    #[tokio::test]
    async fn test_all_sorted() {
        let tracker = CameraStatusTracker::new();
        tracker.update("cam2", StreamStatus::Online).await;
        tracker.update("cam1", StreamStatus::Offline).await;
        let all = tracker.all().await;
        assert_eq!(all[0], ("cam1".to_string(), StreamStatus::Offline));
        assert_eq!(all[1], ("cam2".to_string(), StreamStatus::Online));

        tracker.clear().await;
        assert!(tracker.all().await.is_empty());
    }
}
