//! Detector - object detection backend adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the detection service
//! - Parse and sanitize the response
//! - Track consecutive failures
//!
//! Detection never fails from the caller's point of view: transport
//! errors, timeouts and malformed responses yield an empty list.

use crate::error::{Error, Result};
use crate::frame;
use crate::models::{sanitize_detections, BBox, Detection, Frame, RawDetection};
use base64::Engine as _;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// JPEG quality of frames sent for detection
const REQUEST_JPEG_QUALITY: u8 = 90;

/// Object detection port
pub trait Detector: Send + Sync {
    /// Detections for one frame (empty on any failure)
    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Vec<Detection>>;
}

#[derive(Debug, Serialize)]
struct DetectRequest {
    image: String,
}

/// HTTP detection client
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    consecutive_failures: AtomicU32,
}

impl HttpDetector {
    pub fn new(base_url: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoint: endpoint.into(),
            timeout,
            consecutive_failures: AtomicU32::new(0),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Check detector health
    pub async fn health_check(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Detector health check failed");
                false
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn try_detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let owned = frame.clone();
        let jpeg = tokio::task::spawn_blocking(move || frame::encode_jpeg(&owned, REQUEST_JPEG_QUALITY))
            .await
            .map_err(|e| Error::Internal(format!("encoder task failed: {}", e)))??;

        let request = DetectRequest {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };

        let resp = self
            .client
            .post(self.url(&self.endpoint))
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detection(format!("detector returned {} - {}", status, body)));
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(parse_response(&body))
    }
}

impl Detector for HttpDetector {
    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Vec<Detection>> {
        Box::pin(async move {
            match self.try_detect(frame).await {
                Ok(detections) => {
                    let prev = self.consecutive_failures.swap(0, Ordering::Relaxed);
                    if prev > 0 {
                        tracing::info!(previous_failures = prev, "Detector recovered");
                    }
                    detections
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = failures,
                        "Detection request failed"
                    );
                    Vec::new()
                }
            }
        })
    }
}

/// Extract valid detections from a `{"detections": [...]}` body
///
/// Records that do not deserialize, or fail validation, are dropped
/// individually.
pub fn parse_response(body: &serde_json::Value) -> Vec<Detection> {
    let Some(records) = body.get("detections").and_then(|d| d.as_array()) else {
        tracing::warn!("Detector response has no detections array");
        return Vec::new();
    };

    let raw: Vec<RawDetection> = records
        .iter()
        .filter_map(|r| serde_json::from_value(r.clone()).ok())
        .collect();
    sanitize_detections(raw)
}

/// Offline detector: one unprotected person in the frame center
#[derive(Debug, Clone, Copy, Default)]
pub struct MockDetector;

impl Detector for MockDetector {
    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Vec<Detection>> {
        let (w, h) = (frame.width() as f64, frame.height() as f64);
        let detections = BBox::new(w * 0.3, h * 0.2, w * 0.7, h * 0.8)
            .map(|bbox| vec![Detection::new("person", bbox, 0.9)])
            .unwrap_or_default();
        Box::pin(async move { detections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionClass, PpeKind};
    use serde_json::json;

    #[test]
    fn test_parse_response_drops_malformed() {
        let body = json!({
            "detections": [
                {"class": "person", "bbox": [10, 10, 110, 210], "confidence": 0.93},
                {"class": "goggles", "bbox": [20, 20, 40], "confidence": 0.8},
                {"bbox": [0, 0, 5, 5], "confidence": 0.5},
                {"class": "Lab_Coat", "bbox": "oops"},
                {"class": "gloves", "bbox": [50, 50, 60, 70], "confidence": 1.7}
            ]
        });

        let detections = parse_response(&body);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class(), DetectionClass::Person);
        assert_eq!(detections[1].class(), DetectionClass::Ppe(PpeKind::Gloves));
        assert_eq!(detections[1].confidence, 1.0);
    }

    #[test]
    fn test_parse_response_without_array() {
        assert!(parse_response(&json!({"error": "busy"})).is_empty());
        assert!(parse_response(&json!({"detections": null})).is_empty());
    }

    #[tokio::test]
    async fn test_mock_detector_person_in_center() {
        let frame = Frame::new(640, 480);
        let detections = MockDetector.detect(&frame).await;
        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bbox;
        for (got, want) in bbox.to_array().iter().zip([192.0, 96.0, 448.0, 384.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        assert_eq!(detections[0].class(), DetectionClass::Person);
    }

    #[tokio::test]
    async fn test_unreachable_detector_yields_empty() {
        let detector = HttpDetector::new("http://127.0.0.1:9", "/detect", Duration::from_secs(1)).unwrap();
        let frame = Frame::new(32, 32);

        assert!(detector.detect(&frame).await.is_empty());
        assert!(detector.detect(&frame).await.is_empty());
        assert_eq!(detector.consecutive_failures(), 2);
        assert!(!detector.health_check().await);
    }

    #[test]
    fn test_url_join() {
        let detector = HttpDetector::new("http://det:8001/", "detect", Duration::from_secs(1)).unwrap();
        assert_eq!(detector.url("detect"), "http://det:8001/detect");
        assert_eq!(detector.url("/health"), "http://det:8001/health");
    }
}
