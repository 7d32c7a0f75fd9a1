//! CloudSync - persistence and control backend adapter
//!
//! ## Responsibilities
//!
//! - Upload violation snapshots to object storage
//! - Insert alert records
//! - Report the active monitoring session
//! - Mark a session stopped on shutdown
//!
//! Talks to a PostgREST/storage style API (`/rest/v1`, `/storage/v1`)
//! authenticated with a service key.

use crate::error::{Error, Result};
use crate::session_control::{RemoteSession, SessionSource};
use crate::violation_engine::{AlertSink, AlertUpload};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;

const ALERTS_TABLE: &str = "alerts";
const SESSIONS_TABLE: &str = "monitoring_sessions";

/// Row inserted per alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub session_id: String,
    pub violation_type: String,
    pub image_path: String,
    pub created_at: String,
}

impl AlertRecord {
    pub fn new(alert: &AlertUpload, image_path: String) -> Self {
        Self {
            session_id: alert.session_id.clone(),
            violation_type: alert.missing_ppe.as_str().to_string(),
            image_path,
            created_at: alert.detected_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Storage object path: `{session}/{camera}/{timestamp}_{person}_{ppe}.jpg`
pub fn snapshot_path(alert: &AlertUpload) -> String {
    format!(
        "{}/{}/{}_{}_{}.jpg",
        alert.session_id,
        alert.camera_id,
        snapshot_timestamp(alert.detected_at),
        alert.person_id,
        alert.missing_ppe.as_str()
    )
}

fn snapshot_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// Backend client
pub struct CloudSync {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl CloudSync {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("backend URL must not be empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            bucket: bucket.into(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Upload a JPEG snapshot to the configured bucket
    pub async fn upload_snapshot(&self, path: &str, image_jpeg: Vec<u8>) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let resp = self
            .authorized(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(image_jpeg)
            .send()
            .await?;

        ensure_success(resp, "snapshot upload").await?;
        tracing::info!(path = %path, "Uploaded violation snapshot");
        Ok(())
    }

    /// Insert an alert row
    pub async fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        let resp = self
            .authorized(self.client.post(self.table_url(ALERTS_TABLE)))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;

        ensure_success(resp, "alert insert").await?;
        tracing::info!(
            session_id = %record.session_id,
            violation_type = %record.violation_type,
            "Created violation alert"
        );
        Ok(())
    }

    /// Latest session with status `active`
    pub async fn active_session(&self) -> Result<Option<RemoteSession>> {
        let resp = self
            .authorized(self.client.get(self.table_url(SESSIONS_TABLE)))
            .query(&[
                ("select", "*"),
                ("status", "eq.active"),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ])
            .send()
            .await?;

        let resp = ensure_success(resp, "session poll").await?;
        let rows: Vec<RemoteSession> = resp.json().await?;
        Ok(rows.into_iter().next())
    }

    /// Set a session's status to `stopped`
    pub async fn mark_session_stopped(&self, session_id: &str) -> Result<()> {
        let resp = self
            .authorized(self.client.patch(self.table_url(SESSIONS_TABLE)))
            .query(&[("id", format!("eq.{}", session_id))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "status": "stopped" }))
            .send()
            .await?;

        ensure_success(resp, "session update").await?;
        tracing::info!(session_id = %session_id, "Marked session stopped");
        Ok(())
    }

    async fn deliver(&self, alert: AlertUpload) -> Result<()> {
        let path = snapshot_path(&alert);
        let record = AlertRecord::new(&alert, path.clone());

        self.upload_snapshot(&path, alert.image_jpeg)
            .await
            .map_err(|e| Error::AlertDelivery(format!("{}: {}", path, e)))?;
        self.insert_alert(&record)
            .await
            .map_err(|e| Error::AlertDelivery(format!("{}: {}", path, e)))
    }
}

async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Internal(format!("{} failed: {} - {}", what, status, body)))
}

impl AlertSink for CloudSync {
    fn upload(&self, alert: AlertUpload) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.deliver(alert))
    }
}

impl SessionSource for CloudSync {
    fn fetch_active_session(&self) -> BoxFuture<'_, Result<Option<RemoteSession>>> {
        Box::pin(async move {
            self.active_session()
                .await
                .map_err(|e| Error::Session(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, PpeKind};
    use chrono::TimeZone;

    fn upload() -> AlertUpload {
        AlertUpload {
            session_id: "s-42".to_string(),
            camera_id: "cam1".to_string(),
            person_id: "cam1_150_250".to_string(),
            missing_ppe: PpeKind::LabCoat,
            image_jpeg: vec![0xFF, 0xD8, 0xFF],
            bbox: BBox::new(100.0, 100.0, 200.0, 400.0).unwrap(),
            detected_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
                + chrono::Duration::microseconds(123_456),
        }
    }

    #[test]
    fn test_snapshot_path() {
        assert_eq!(
            snapshot_path(&upload()),
            "s-42/cam1/20240305_140709_123456_cam1_150_250_lab_coat.jpg"
        );
    }

    #[test]
    fn test_alert_record() {
        let alert = upload();
        let record = AlertRecord::new(&alert, snapshot_path(&alert));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["session_id"], "s-42");
        assert_eq!(value["violation_type"], "lab_coat");
        assert_eq!(value["created_at"], "2024-03-05T14:07:09.123456Z");
        assert!(value["image_path"].as_str().unwrap().starts_with("s-42/cam1/"));
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(CloudSync::new("", "key", "bucket", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_errors() {
        let sync = CloudSync::new("http://127.0.0.1:9/", "key", "bucket", Duration::from_secs(1)).unwrap();

        assert!(matches!(sync.upload(upload()).await, Err(Error::AlertDelivery(_))));
        assert!(matches!(sync.fetch_active_session().await, Err(Error::Session(_))));
        assert!(sync.mark_session_stopped("s-42").await.is_err());
    }

    #[test]
    fn test_remote_session_parse() {
        let rows: Vec<RemoteSession> = serde_json::from_value(serde_json::json!([
            {"id": "abc", "status": "active", "created_at": "2024-01-01T00:00:00Z",
             "config": {"goggles_enabled": false}}
        ]))
        .unwrap();
        assert_eq!(rows[0].id, "abc");
        assert!(rows[0].config.is_some());
    }
}
