//! PPE Edge Controller Library
//!
//! Multi-camera ingestion with a PPE compliance violation engine.
//!
//! ## Architecture
//!
//! 1. CameraManager - One stream worker per configured source
//! 2. CameraStream - Connect, read, subsample, detect, evaluate
//! 3. Detector - Object detection backend adapter (HTTP or mock)
//! 4. ViolationEngine - Person tracking and debounce/cooldown alerts
//! 5. SessionPoller - Monitoring session gate from the backend
//! 6. CloudSync - Snapshot storage, alert records, session status
//! 7. EdgeController - Wiring and lifecycle
//!
//! ## Data Flow
//!
//! CameraStream -> Detector -> ViolationEngine -> AlertSink (CloudSync)
//!
//! SessionPoller -> ViolationEngine (start/stop gate)

pub mod camera_manager;
pub mod camera_status_tracker;
pub mod camera_stream;
pub mod cloud_sync;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod models;
pub mod service;
pub mod session_control;
pub mod violation_engine;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use service::EdgeController;
