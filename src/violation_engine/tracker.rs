//! Person tracking
//!
//! Identity is derived from the box center on a coarse pixel grid rather
//! than from a multi-frame tracker. Any assigner that maps the current
//! person boxes to stable ids can replace it.

use crate::models::{BBox, Detection, PpeKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Maps the person boxes of one frame to identities
pub trait IdentityAssigner: Send + Sync {
    /// Returns one identity per box, in input order
    fn assign(&self, camera_id: &str, boxes: &[BBox]) -> Vec<String>;
}

/// Identity from the quantized box center: `{camera}_{cx}_{cy}`
#[derive(Debug, Clone, Copy)]
pub struct CenterGridIdentity {
    /// Grid cell size in pixels
    pub cell_px: u32,
}

impl Default for CenterGridIdentity {
    fn default() -> Self {
        Self { cell_px: 1 }
    }
}

impl CenterGridIdentity {
    pub fn identity(&self, camera_id: &str, bbox: &BBox) -> String {
        let cell = self.cell_px.max(1) as i64;
        let (cx, cy) = bbox.center();
        let qx = (cx.trunc() as i64).div_euclid(cell) * cell;
        let qy = (cy.trunc() as i64).div_euclid(cell) * cell;
        format!("{}_{}_{}", camera_id, qx, qy)
    }
}

impl IdentityAssigner for CenterGridIdentity {
    fn assign(&self, camera_id: &str, boxes: &[BBox]) -> Vec<String> {
        boxes.iter().map(|b| self.identity(camera_id, b)).collect()
    }
}

/// A tracked person and the PPE matched to them in the latest frame
#[derive(Debug, Clone)]
pub struct PersonTracker {
    pub person_id: String,
    pub camera_id: String,
    pub bbox: BBox,
    pub ppe: HashMap<PpeKind, Vec<Detection>>,
    pub last_seen: DateTime<Utc>,
}

impl PersonTracker {
    pub fn new(person_id: String, camera_id: String, bbox: BBox, now: DateTime<Utc>) -> Self {
        Self {
            person_id,
            camera_id,
            bbox,
            ppe: HashMap::new(),
            last_seen: now,
        }
    }

    /// Overwrite box and PPE with this frame's observation
    pub fn update(&mut self, bbox: BBox, matched: Vec<(PpeKind, Detection)>, now: DateTime<Utc>) {
        self.bbox = bbox;
        self.ppe.clear();
        for (kind, det) in matched {
            self.ppe.entry(kind).or_default().push(det);
        }
        self.last_seen = now;
    }

    pub fn has_ppe(&self, kind: PpeKind) -> bool {
        self.ppe.get(&kind).is_some_and(|dets| !dets.is_empty())
    }

    /// Silent for strictly longer than `window`
    pub fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.last_seen > window
    }
}

/// PPE detections overlapping a person box by at least `threshold` IoU
///
/// A PPE box may match several people.
pub fn match_ppe(person: &BBox, ppe: &[(PpeKind, &Detection)], threshold: f64) -> Vec<(PpeKind, Detection)> {
    ppe.iter()
        .filter(|(_, det)| person.iou(&det.bbox) >= threshold)
        .map(|(kind, det)| (*kind, (*det).clone()))
        .collect()
}
