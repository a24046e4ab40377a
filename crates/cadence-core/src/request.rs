//! Request and sentence-unit identifiers plus the request state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a submitted TTS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single sentence unit: the owning request plus the unit's
/// position in the original sentence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId {
    /// The request this unit was segmented from.
    pub request: RequestId,
    /// Zero-based sequence index; defines reassembly order.
    pub index: u32,
}

impl UnitId {
    /// Create a unit identity for a request and sequence index.
    #[must_use]
    pub const fn new(request: RequestId, index: u32) -> Self {
        Self { request, index }
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.request, self.index)
    }
}

/// Lifecycle of a request inside the scheduler.
///
/// Transitions: Pending → Segmenting → Queued → Running → {Done | Failed}.
/// Cancelled is reachable from Pending and Queued; cancelling a Running
/// request only suppresses result delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Admitted but not yet segmented.
    Pending,
    /// Text is being split into sentence units.
    Segmenting,
    /// Units are in the pending pool awaiting bucketing.
    Queued,
    /// At least one unit is inside an in-flight bucket.
    Running,
    /// All units synthesized and the artifact recorded.
    Done,
    /// Terminal failure after exhausting retries.
    Failed,
    /// Cancelled by the caller before completion.
    Cancelled,
}

impl RequestStatus {
    /// Whether this status is terminal (no further transitions).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Segmenting => "Segmenting",
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{name}")
    }
}
