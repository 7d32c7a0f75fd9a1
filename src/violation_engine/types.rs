//! Violation engine types

use crate::error::Result;
use crate::models::{BBox, Frame, PpeKind};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;

/// PPE kind -> required flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredPpe(BTreeMap<PpeKind, bool>);

impl RequiredPpe {
    pub fn from_flags(goggles: bool, lab_coat: bool, gloves: bool, helmet: bool) -> Self {
        Self(BTreeMap::from([
            (PpeKind::Goggles, goggles),
            (PpeKind::LabCoat, lab_coat),
            (PpeKind::Gloves, gloves),
            (PpeKind::Helmet, helmet),
        ]))
    }

    pub fn is_required(&self, kind: PpeKind) -> bool {
        self.0.get(&kind).copied().unwrap_or(false)
    }

    pub fn set(&mut self, kind: PpeKind, required: bool) {
        self.0.insert(kind, required);
    }

    /// Required kinds in stable order
    pub fn required_kinds(&self) -> impl Iterator<Item = PpeKind> + '_ {
        self.0.iter().filter(|(_, r)| **r).map(|(k, _)| *k)
    }

    /// Apply a session payload; kinds it does not mention keep their value
    pub fn apply(&mut self, config: &SessionConfig) {
        for (kind, required) in &config.flags {
            self.set(*kind, *required);
        }
    }
}

impl Default for RequiredPpe {
    fn default() -> Self {
        Self::from_flags(false, false, false, false)
    }
}

/// PPE requirement payload carried by a session start
///
/// Recognized keys are `goggles_enabled`, `lab_coat_enabled`,
/// `gloves_enabled` and `helmet_enabled`; anything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    flags: BTreeMap<PpeKind, bool>,
}

impl SessionConfig {
    /// Config key for a PPE kind
    pub fn key_for(kind: PpeKind) -> String {
        format!("{}_enabled", kind.as_str())
    }

    pub fn with(mut self, kind: PpeKind, required: bool) -> Self {
        self.flags.insert(kind, required);
        self
    }

    /// Extract recognized boolean keys from a JSON payload
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut config = Self::default();
        let Some(object) = value.as_object() else {
            return config;
        };

        for kind in PpeKind::ALL {
            match object.get(&Self::key_for(kind)) {
                Some(serde_json::Value::Bool(flag)) => {
                    config.flags.insert(kind, *flag);
                }
                Some(other) => {
                    tracing::warn!(
                        key = %Self::key_for(kind),
                        value = %other,
                        "Ignoring non-boolean PPE requirement"
                    );
                }
                None => {}
            }
        }

        config
    }

    pub fn get(&self, kind: PpeKind) -> Option<bool> {
        self.flags.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Immutable snapshot of the active monitoring session
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub session_id: String,
    pub required: RequiredPpe,
}

/// A violation confirmed by the state machine
#[derive(Debug, Clone)]
pub struct ViolationAlert {
    pub session_id: String,
    pub camera_id: String,
    pub person_id: String,
    pub missing_ppe: PpeKind,
    pub bbox: BBox,
    /// Person region with padding
    pub snapshot: Frame,
    pub detected_at: DateTime<Utc>,
}

/// Payload handed to the alert sink
#[derive(Debug, Clone, Serialize)]
pub struct AlertUpload {
    pub session_id: String,
    pub camera_id: String,
    pub person_id: String,
    pub missing_ppe: PpeKind,
    /// JPEG snapshot of the person
    #[serde(skip)]
    pub image_jpeg: Vec<u8>,
    pub bbox: BBox,
    pub detected_at: DateTime<Utc>,
}

/// Durable storage of violation snapshots and alert records
pub trait AlertSink: Send + Sync {
    fn upload(&self, alert: AlertUpload) -> BoxFuture<'_, Result<()>>;
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub alerts_emitted: u64,
    pub tracked_people: usize,
    pub open_violations: usize,
}
