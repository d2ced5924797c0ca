use crate::model::DeviceSnapshot;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Coordinator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No cycle has run yet
    Idle,
    /// A cycle is reading banks
    Polling,
    /// The last cycle produced a snapshot
    Ready,
    /// The last cycle failed; the reason is kept
    Failed(String),
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorState::Idle => write!(f, "Idle"),
            CoordinatorState::Polling => write!(f, "Polling"),
            CoordinatorState::Ready => write!(f, "Ready"),
            CoordinatorState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// What subscribers see after every state change
#[derive(Debug, Clone)]
pub struct PollStatus {
    pub state: CoordinatorState,
    /// Latest successful snapshot, kept across failed cycles
    pub snapshot: Option<Arc<DeviceSnapshot>>,
    /// Whether `snapshot` is older than the configured threshold
    pub stale: bool,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_polls: u64,
    pub failed_polls: u64,
    pub last_poll_duration_ms: Option<u64>,
}

impl Default for PollStatus {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            snapshot: None,
            stale: false,
            last_error: None,
            last_success: None,
            total_polls: 0,
            failed_polls: 0,
            last_poll_duration_ms: None,
        }
    }
}

impl PollStatus {
    pub fn is_ready(&self) -> bool {
        self.state == CoordinatorState::Ready
    }
}
