//! Tenant engine lifecycle states
//!
//! State transitions:
//! - Unconfigured | Failed | Stopped → Initializing: create, retry or restart
//! - Initializing → Started: initialize and start succeeded
//! - Initializing → Failed: initialize or start failed
//! - Initializing → Unconfigured: no configuration exists for the tenant
//! - Initializing → Stopped: initialization interrupted by restart or remove
//! - Started → Started: configuration applied in place
//! - Started → Stopping → Initializing: restart or incompatible reconfigure
//! - Stopping → Failed: stop failed, engine stays registered
//! - Started | Failed | Unconfigured | Stopped → Removing: remove

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one tenant's engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Registered but no configuration has been found yet
    Unconfigured,
    /// Configuration is being loaded and the engine initialized and started
    Initializing,
    /// Engine is running
    Started,
    /// Engine is being stopped ahead of a restart
    Stopping,
    /// Engine was stopped (or its initialization interrupted)
    Stopped,
    /// Last transition failed; see the entry's last error
    Failed,
    /// Engine is being stopped and deregistered
    Removing,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Unconfigured,
        LifecycleState::Initializing,
        LifecycleState::Started,
        LifecycleState::Stopping,
        LifecycleState::Stopped,
        LifecycleState::Failed,
        LifecycleState::Removing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
            LifecycleState::Removing => "removing",
        }
    }

    /// Whether a transition is in progress (another operation holds the tenant)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleState::Initializing | LifecycleState::Stopping | LifecycleState::Removing
        )
    }

    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState as S;

        matches!(
            (*self, next),
            (
                S::Unconfigured | S::Failed | S::Stopped | S::Initializing | S::Stopping,
                S::Initializing
            ) | (
                S::Initializing,
                S::Started | S::Failed | S::Unconfigured | S::Stopped
            ) | (S::Started, S::Started | S::Stopping | S::Removing)
                | (S::Stopping, S::Failed | S::Stopped)
                | (
                    S::Unconfigured | S::Failed | S::Stopped,
                    S::Removing
                )
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle step in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Loading the tenant's configuration
    Configure,
    Initialize,
    Start,
    Reconfigure,
    Stop,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Configure => "configure",
            LifecyclePhase::Initialize => "initialize",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Reconfigure => "reconfigure",
            LifecyclePhase::Stop => "stop",
        }
    }
}

/// Most recent failure recorded on a tenant's registry entry.
///
/// Retained until the next successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleError {
    pub phase: LifecyclePhase,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleError {
    pub fn new(phase: LifecyclePhase, message: impl fmt::Display) -> Self {
        Self {
            phase,
            message: message.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase.as_str(), self.message)
    }
}
