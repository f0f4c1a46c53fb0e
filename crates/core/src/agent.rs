//! Agent status state machine.

use serde::{Deserialize, Serialize};

/// Where an agent is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Never successfully warmed or answered
    #[default]
    Cold,
    /// First-ever generation in flight
    ColdProcessing,
    /// Warmed and idle
    Ready,
    /// Generation in flight after at least one prior success
    Processing,
}

/// Things that move an agent between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    TurnSubmitted,
    TurnCompleted,
    TurnCancelled,
    TurnFailed,
    WarmupSucceeded,
    WarmupFailed,
}

impl AgentStatus {
    /// The status after `event`, or `None` if the event is not valid here.
    pub fn next(self, event: StatusEvent) -> Option<AgentStatus> {
        use AgentStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (Cold, TurnSubmitted) => Some(ColdProcessing),
            (Ready, TurnSubmitted) => Some(Processing),
            (ColdProcessing | Processing, TurnSubmitted) => None,

            (ColdProcessing | Processing, TurnCompleted) => Some(Ready),
            (Cold | Ready, TurnCompleted) => None,

            // A cancelled or failed first turn leaves the agent cold.
            (ColdProcessing, TurnCancelled | TurnFailed) => Some(Cold),
            (Processing, TurnCancelled | TurnFailed) => Some(Ready),
            (Cold | Ready, TurnCancelled | TurnFailed) => None,

            (Cold | Ready, WarmupSucceeded) => Some(Ready),
            (Cold | Ready, WarmupFailed) => Some(Cold),
            (ColdProcessing | Processing, WarmupSucceeded | WarmupFailed) => None,
        }
    }

    /// Whether a generation is in flight.
    pub fn is_processing(self) -> bool {
        matches!(self, Self::ColdProcessing | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::ColdProcessing => "cold_processing",
            Self::Ready => "ready",
            Self::Processing => "processing",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
