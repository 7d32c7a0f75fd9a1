//! Debounce / cooldown state machine
//!
//! Keyed by (camera, person, PPE kind). A key without an entry is
//! compliant. Confirmation (Active) and Cooling are entered together, so
//! only `Pending` and `Cooling` are ever stored.

use crate::models::PpeKind;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// One compliance dimension for one tracked person on one camera
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViolationKey {
    pub camera_id: String,
    pub person_id: String,
    pub ppe: PpeKind,
}

impl ViolationKey {
    pub fn new(camera_id: impl Into<String>, person_id: impl Into<String>, ppe: PpeKind) -> Self {
        Self {
            camera_id: camera_id.into(),
            person_id: person_id.into(),
            ppe,
        }
    }
}

impl fmt::Display for ViolationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.camera_id, self.person_id, self.ppe)
    }
}

/// Stored phase of a violation key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPhase {
    /// Non-compliance observed since `since`, not yet confirmed
    Pending { since: DateTime<Utc> },
    /// Alert emitted; key is suppressed until `until`
    Cooling {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

/// Outcome of evaluating one key for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Inside a cooldown window; compliance not consulted
    Skipped,
    /// PPE present; any pending violation cleared
    Compliant,
    /// PPE missing, debounce not yet elapsed
    Pending,
    /// Newly confirmed violation: emit exactly one alert
    Confirmed,
}

/// Advance the state of one key
///
/// Returns the phase to store (`None` = compliant, remove the entry) and
/// the verdict for this frame. On cooldown expiry the pending start is kept,
/// so continued non-compliance is confirmed again immediately.
pub fn evaluate(
    phase: Option<ViolationPhase>,
    has_ppe: bool,
    now: DateTime<Utc>,
    debounce: Duration,
    cooldown: Duration,
) -> (Option<ViolationPhase>, Verdict) {
    let pending_since = match phase {
        Some(ViolationPhase::Cooling { until, .. }) if now < until => {
            return (phase, Verdict::Skipped);
        }
        Some(ViolationPhase::Cooling { since, .. }) => Some(since),
        Some(ViolationPhase::Pending { since }) => Some(since),
        None => None,
    };

    if has_ppe {
        return (None, Verdict::Compliant);
    }

    let since = pending_since.unwrap_or(now);
    if now - since >= debounce {
        let cooling = ViolationPhase::Cooling {
            since,
            until: now + cooldown,
        };
        (Some(cooling), Verdict::Confirmed)
    } else {
        (Some(ViolationPhase::Pending { since }), Verdict::Pending)
    }
}
