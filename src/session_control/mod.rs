//! Session control
//!
//! ## Responsibilities
//!
//! - Session start/stop commands and their effect on the engine
//! - Polling the backend for the active monitoring session
//! - Tracking the current session for graceful shutdown

use crate::error::{Error, Result};
use crate::violation_engine::{SessionConfig, ViolationEngine};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Start,
    Stop,
}

/// `{action, session_id, config?}` control event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCommand {
    pub action: SessionAction,
    #[serde(default)]
    pub session_id: Option<String>,
    /// PPE requirement payload (start only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl SessionCommand {
    pub fn start(session_id: impl Into<String>, config: Option<serde_json::Value>) -> Self {
        Self {
            action: SessionAction::Start,
            session_id: Some(session_id.into()),
            config,
        }
    }

    pub fn stop(session_id: Option<String>) -> Self {
        Self {
            action: SessionAction::Stop,
            session_id,
            config: None,
        }
    }
}

/// Apply a control event to the engine
pub async fn apply_command(engine: &ViolationEngine, command: &SessionCommand) -> Result<()> {
    match command.action {
        SessionAction::Start => {
            let session_id = command
                .session_id
                .as_deref()
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| Error::Session("start command without session id".to_string()))?;

            tracing::info!(session_id = %session_id, "Starting session");
            let config = command.config.as_ref().map(SessionConfig::from_json);
            engine.set_active_session(session_id, config).await;
        }
        SessionAction::Stop => {
            tracing::info!(session_id = ?command.session_id, "Stopping session");
            engine.clear_active_session().await;
        }
    }
    Ok(())
}

/// Active session row as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

/// Source of the currently active session
pub trait SessionSource: Send + Sync {
    fn fetch_active_session(&self) -> BoxFuture<'_, Result<Option<RemoteSession>>>;
}

/// Polls a session source and drives the engine's session gate
pub struct SessionPoller {
    source: Arc<dyn SessionSource>,
    engine: Arc<ViolationEngine>,
    interval: Duration,
    /// Session started by this poller and not yet stopped
    current: Mutex<Option<String>>,
}

impl SessionPoller {
    pub fn new(source: Arc<dyn SessionSource>, engine: Arc<ViolationEngine>, interval: Duration) -> Self {
        Self {
            source,
            engine,
            interval,
            current: Mutex::new(None),
        }
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.current.lock().await.clone()
    }

    /// Fetch once and apply the resulting command, if any
    pub async fn poll_once(&self) -> Result<Option<SessionCommand>> {
        let polled = self.source.fetch_active_session().await?;

        let mut current = self.current.lock().await;
        let command = match polled {
            Some(session) if current.as_deref() != Some(session.id.as_str()) => {
                tracing::info!(session_id = %session.id, "Detected active session");
                Some(SessionCommand::start(session.id, session.config))
            }
            Some(_) => None,
            None => current.take().map(|prev| {
                tracing::info!(session_id = %prev, "Active session ended");
                SessionCommand::stop(Some(prev))
            }),
        };

        if let Some(command) = &command {
            apply_command(&self.engine, command).await?;
            if command.action == SessionAction::Start {
                *current = command.session_id.clone();
            }
        }
        Ok(command)
    }

    /// Poll until cancelled; errors are logged and polling continues
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Starting session polling");

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.poll_once() => r,
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "Session poll failed");
            }
        }

        tracing::info!("Session polling stopped");
    }
}
