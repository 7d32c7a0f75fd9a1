//! ViolationEngine - PPE compliance and alert decisions
//!
//! ## Responsibilities
//!
//! - Person tracking with derived identities
//! - PPE-to-person association by IoU
//! - Debounce / cooldown state per (camera, person, PPE kind)
//! - Alert dispatch to the alert sink (best effort, one attempt)
//!
//! All camera workers share one engine. The tracker map and violation table
//! are updated under a single lock per frame; the active session is an
//! immutable snapshot swapped atomically and read once per frame.

mod state;
mod tracker;
mod types;

pub use state::{evaluate, Verdict, ViolationKey, ViolationPhase};
pub use tracker::{match_ppe, CenterGridIdentity, IdentityAssigner, PersonTracker};
pub use types::{
    ActiveSession, AlertSink, AlertUpload, EngineStats, RequiredPpe, SessionConfig, ViolationAlert,
};

use crate::config::EngineConfig;
use crate::frame;
use crate::models::{BBox, Detection, DetectionClass, Frame, PpeKind};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Session gate and the requirement set carried between sessions
struct SessionState {
    active: Option<Arc<ActiveSession>>,
    required: RequiredPpe,
}

/// Tracker map and violation table (guarded together)
#[derive(Default)]
struct TrackingState {
    people: HashMap<String, PersonTracker>,
    violations: HashMap<ViolationKey, ViolationPhase>,
    frames_processed: u64,
    alerts_emitted: u64,
}

/// ViolationEngine instance
pub struct ViolationEngine {
    config: EngineConfig,
    identity: Box<dyn IdentityAssigner>,
    sink: Arc<dyn AlertSink>,
    session: RwLock<SessionState>,
    tracking: Mutex<TrackingState>,
}

impl ViolationEngine {
    /// Create new ViolationEngine
    pub fn new(config: EngineConfig, sink: Arc<dyn AlertSink>) -> Self {
        let required = config.required_ppe.clone();
        Self {
            config,
            identity: Box::new(CenterGridIdentity::default()),
            sink,
            session: RwLock::new(SessionState {
                active: None,
                required,
            }),
            tracking: Mutex::new(TrackingState::default()),
        }
    }

    /// Replace the identity assigner
    pub fn with_identity_assigner(mut self, identity: impl IdentityAssigner + 'static) -> Self {
        self.identity = Box::new(identity);
        self
    }

    /// Activate a session, updating requirements from its config
    pub async fn set_active_session(&self, session_id: impl Into<String>, config: Option<SessionConfig>) {
        let session_id = session_id.into();
        let mut session = self.session.write().await;

        if let Some(config) = config {
            session.required.apply(&config);
        }

        let snapshot = ActiveSession {
            session_id: session_id.clone(),
            required: session.required.clone(),
        };
        tracing::info!(
            session_id = %session_id,
            required = ?snapshot.required.required_kinds().collect::<Vec<_>>(),
            "Active session set"
        );
        session.active = Some(Arc::new(snapshot));
    }

    /// Halt evaluation; tracked state is left to expire
    pub async fn clear_active_session(&self) {
        let mut session = self.session.write().await;
        if let Some(prev) = session.active.take() {
            tracing::info!(session_id = %prev.session_id, "Active session cleared");
        }
    }

    /// Current session snapshot
    pub async fn active_session(&self) -> Option<Arc<ActiveSession>> {
        self.session.read().await.active.clone()
    }

    /// Requirement set that the next session start will build on
    pub async fn required_ppe(&self) -> RequiredPpe {
        self.session.read().await.required.clone()
    }

    /// Process one frame's detections at the current time
    pub async fn process_frame(
        &self,
        camera_id: &str,
        frame: &Frame,
        detections: Vec<Detection>,
    ) -> Vec<ViolationAlert> {
        self.process_frame_at(camera_id, frame, detections, Utc::now()).await
    }

    /// Process one frame's detections observed at `now`
    ///
    /// No-op without an active session. Returns the alerts confirmed by
    /// this frame; each has already been handed to the alert sink.
    pub async fn process_frame_at(
        &self,
        camera_id: &str,
        frame: &Frame,
        detections: Vec<Detection>,
        now: DateTime<Utc>,
    ) -> Vec<ViolationAlert> {
        let Some(session) = self.active_session().await else {
            return Vec::new();
        };

        let mut person_boxes: Vec<BBox> = Vec::new();
        let mut ppe: Vec<(PpeKind, &Detection)> = Vec::new();
        for det in &detections {
            match det.class() {
                DetectionClass::Person => person_boxes.push(det.bbox),
                DetectionClass::Ppe(kind) => ppe.push((kind, det)),
                DetectionClass::Other => {}
            }
        }

        let identities = self.identity.assign(camera_id, &person_boxes);

        let alerts = {
            let mut tracking = self.tracking.lock().await;
            tracking.frames_processed += 1;

            let mut seen: Vec<String> = Vec::with_capacity(identities.len());
            for (person_id, bbox) in identities.into_iter().zip(person_boxes.iter()) {
                let matched = match_ppe(bbox, &ppe, self.config.iou_threshold);
                tracking
                    .people
                    .entry(person_id.clone())
                    .or_insert_with(|| {
                        tracing::debug!(camera_id = %camera_id, person_id = %person_id, "New person tracked");
                        PersonTracker::new(person_id.clone(), camera_id.to_string(), *bbox, now)
                    })
                    .update(*bbox, matched, now);
                if !seen.contains(&person_id) {
                    seen.push(person_id);
                }
            }

            self.expire(&mut tracking, &seen, now);

            let mut alerts = Vec::new();
            for person_id in &seen {
                let Some(tracker) = tracking.people.get(person_id).cloned() else {
                    continue;
                };
                for kind in session.required.required_kinds() {
                    let key = ViolationKey::new(camera_id, person_id.clone(), kind);
                    let (next, verdict) = evaluate(
                        tracking.violations.get(&key).copied(),
                        tracker.has_ppe(kind),
                        now,
                        self.config.debounce,
                        self.config.cooldown,
                    );

                    match next {
                        Some(phase) => {
                            tracking.violations.insert(key, phase);
                        }
                        None => {
                            tracking.violations.remove(&key);
                        }
                    }

                    if verdict == Verdict::Confirmed {
                        tracking.alerts_emitted += 1;
                        alerts.push(self.build_alert(&session, &tracker, kind, frame, now));
                    }
                }
            }
            alerts
        };

        for alert in &alerts {
            self.dispatch(alert.clone());
        }

        alerts
    }

    /// Drop silent trackers and violation entries nobody can resolve any more
    fn expire(&self, tracking: &mut TrackingState, seen: &[String], now: DateTime<Utc>) {
        let window = self.config.tracker_silence;
        let before = tracking.people.len();
        tracking
            .people
            .retain(|id, t| seen.contains(id) || !t.is_expired(now, window));

        let expired = before - tracking.people.len();
        if expired > 0 {
            tracing::debug!(expired = expired, "Expired silent trackers");
        }

        let people = &tracking.people;
        tracking.violations.retain(|key, phase| {
            people.contains_key(&key.person_id)
                || matches!(phase, ViolationPhase::Cooling { until, .. } if now < *until)
        });
    }

    fn build_alert(
        &self,
        session: &ActiveSession,
        tracker: &PersonTracker,
        kind: PpeKind,
        frame: &Frame,
        now: DateTime<Utc>,
    ) -> ViolationAlert {
        tracing::warn!(
            session_id = %session.session_id,
            camera_id = %tracker.camera_id,
            person_id = %tracker.person_id,
            missing_ppe = %kind,
            "Violation detected"
        );

        ViolationAlert {
            session_id: session.session_id.clone(),
            camera_id: tracker.camera_id.clone(),
            person_id: tracker.person_id.clone(),
            missing_ppe: kind,
            bbox: tracker.bbox,
            snapshot: frame::crop_with_padding(frame, &tracker.bbox, self.config.snapshot_padding),
            detected_at: now,
        }
    }

    /// Hand an alert to the sink on its own task
    fn dispatch(&self, alert: ViolationAlert) {
        let sink = self.sink.clone();
        let quality = self.config.snapshot_quality;

        tokio::spawn(async move {
            let ViolationAlert {
                session_id,
                camera_id,
                person_id,
                missing_ppe,
                bbox,
                snapshot,
                detected_at,
            } = alert;

            let encoded = tokio::task::spawn_blocking(move || frame::encode_jpeg(&snapshot, quality)).await;
            let image_jpeg = match encoded {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    tracing::error!(camera_id = %camera_id, error = %e, "Failed to encode violation snapshot");
                    return;
                }
                Err(e) => {
                    tracing::error!(camera_id = %camera_id, error = %e, "Snapshot encoder task failed");
                    return;
                }
            };

            let upload = AlertUpload {
                session_id,
                camera_id: camera_id.clone(),
                person_id: person_id.clone(),
                missing_ppe,
                image_jpeg,
                bbox,
                detected_at,
            };

            if let Err(e) = sink.upload(upload).await {
                tracing::error!(
                    camera_id = %camera_id,
                    person_id = %person_id,
                    missing_ppe = %missing_ppe,
                    error = %e,
                    "Failed to upload violation"
                );
            }
        });
    }

    /// Ids of currently tracked people
    pub async fn tracked_people(&self) -> Vec<String> {
        let tracking = self.tracking.lock().await;
        let mut ids: Vec<String> = tracking.people.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stored phase for a key (`None` = compliant)
    pub async fn violation_phase(&self, key: &ViolationKey) -> Option<ViolationPhase> {
        self.tracking.lock().await.violations.get(key).copied()
    }

    pub async fn stats(&self) -> EngineStats {
        let tracking = self.tracking.lock().await;
        EngineStats {
            frames_processed: tracking.frames_processed,
            alerts_emitted: tracking.alerts_emitted,
            tracked_people: tracking.people.len(),
            open_violations: tracking.violations.len(),
        }
    }
}
