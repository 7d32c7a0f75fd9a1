//! Shared models and types
//!
//! This module contains types shared across the stream, detector and
//! violation engine modules to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A video frame (8-bit RGB)
pub type Frame = image::RgbImage;

/// Requested frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one rgb24 frame of this size
    pub fn rgb_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// One configured camera source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSource {
    /// Unique camera id
    pub id: String,
    /// Network URL, device index, media file path or static image path
    pub source: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CameraSource {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            enabled: true,
        }
    }
}

/// Axis-aligned bounding box in frame pixel coordinates
///
/// Always non-degenerate: `x2 > x1` and `y2 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    /// Create a box, rejecting degenerate or non-finite coordinates
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Option<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if !finite || x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }

    /// Create from the `[x1, y1, x2, y2]` wire representation
    pub fn from_slice(coords: &[f64]) -> Option<Self> {
        match coords {
            [x1, y1, x2, y2] => Self::new(*x1, *y1, *x2, *y2),
            _ => None,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over Union with another box
    ///
    /// Returns 0.0 for disjoint boxes (touching edges included).
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }
}

/// Protective equipment kinds tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpeKind {
    Goggles,
    LabCoat,
    Gloves,
    Helmet,
}

impl PpeKind {
    pub const ALL: [PpeKind; 4] = [
        PpeKind::Goggles,
        PpeKind::LabCoat,
        PpeKind::Gloves,
        PpeKind::Helmet,
    ];

    /// Class label used by the detector and in alert records
    pub fn as_str(&self) -> &'static str {
        match self {
            PpeKind::Goggles => "goggles",
            PpeKind::LabCoat => "lab_coat",
            PpeKind::Gloves => "gloves",
            PpeKind::Helmet => "helmet",
        }
    }

    /// Case-insensitive lookup from a detection class label
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        PpeKind::ALL.into_iter().find(|k| k.as_str() == label)
    }
}

impl fmt::Display for PpeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a detection label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionClass {
    Person,
    Ppe(PpeKind),
    Other,
}

/// Detection record as delivered by the backend (loosely typed)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Validated detection for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Class label as reported by the backend
    #[serde(rename = "class")]
    pub class_label: String,
    pub bbox: BBox,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, bbox: BBox, confidence: f64) -> Self {
        Self {
            class_label: class_label.into(),
            bbox,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Validate a wire record; malformed records yield `None`
    pub fn from_raw(raw: RawDetection) -> Option<Self> {
        let class_label = raw.class.filter(|c| !c.trim().is_empty())?;
        let bbox = BBox::from_slice(raw.bbox.as_deref()?)?;
        let confidence = raw.confidence.unwrap_or(0.0);
        Some(Self::new(class_label, bbox, confidence))
    }

    pub fn class(&self) -> DetectionClass {
        if self.class_label.trim().eq_ignore_ascii_case("person") {
            return DetectionClass::Person;
        }
        match PpeKind::from_label(&self.class_label) {
            Some(kind) => DetectionClass::Ppe(kind),
            None => DetectionClass::Other,
        }
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Drop malformed records, keeping the valid ones in order
pub fn sanitize_detections(raw: Vec<RawDetection>) -> Vec<Detection> {
    let total = raw.len();
    let valid: Vec<Detection> = raw.into_iter().filter_map(Detection::from_raw).collect();
    if valid.len() < total {
        tracing::debug!(
            dropped = total - valid.len(),
            kept = valid.len(),
            "Dropped malformed detection records"
        );
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BBox {
        BBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = bbox(10.0, 10.0, 50.0, 60.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);

        // Touching edges do not overlap
        let c = bbox(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 5.0, 15.0, 15.0);
        assert_eq!(a.iou(&b), b.iou(&a));
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_rejects_degenerate() {
        assert!(BBox::new(10.0, 10.0, 10.0, 20.0).is_none());
        assert!(BBox::new(10.0, 20.0, 30.0, 5.0).is_none());
        assert!(BBox::new(f64::NAN, 0.0, 1.0, 1.0).is_none());
        assert!(BBox::from_slice(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_ppe_kind_from_label_case_insensitive() {
        assert_eq!(PpeKind::from_label("Goggles"), Some(PpeKind::Goggles));
        assert_eq!(PpeKind::from_label("LAB_COAT"), Some(PpeKind::LabCoat));
        assert_eq!(PpeKind::from_label("mask"), None);
    }

    #[test]
    fn test_detection_from_raw() {
        let raw: RawDetection = serde_json::from_value(serde_json::json!({
            "class": "Person",
            "bbox": [1.0, 2.0, 30.0, 40.0],
            "confidence": 1.7
        }))
        .unwrap();
        let det = Detection::from_raw(raw).unwrap();
        assert_eq!(det.class(), DetectionClass::Person);
        assert_eq!(det.confidence, 1.0);
    }

    #[test]
    fn test_sanitize_drops_malformed() {
        let raw: Vec<RawDetection> = serde_json::from_value(serde_json::json!([
            {"class": "gloves", "bbox": [0, 0, 10, 10], "confidence": 0.9},
            {"class": "gloves", "bbox": [], "confidence": 0.9},
            {"class": "helmet", "bbox": [5, 5, 5, 10], "confidence": 0.9},
            {"bbox": [0, 0, 10, 10]},
            {"class": "helmet", "bbox": [0, 0, 4, 4]}
        ]))
        .unwrap();
        let dets = sanitize_detections(raw);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class(), DetectionClass::Ppe(PpeKind::Gloves));
        assert_eq!(dets[1].confidence, 0.0);
    }
}
