use crate::chat::message::{RequestKind, RequestTransitionRejection};

/// Why a user action was dropped before any request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredReason {
    EmptyQuestion,
    NoImageSelected,
    RequestInFlight(RequestKind),
}

/// Result of a request-bearing action once it has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Ignored(IgnoredReason),
    /// The backend answered and the reply was appended.
    Completed,
    /// The request failed and an assistant error message was appended.
    Failed { detail: Option<String> },
    /// The resolution did not match the outstanding request; nothing changed.
    Stale(RequestTransitionRejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    Ignored(IgnoredReason),
    Cleared,
    /// Local history was emptied although the backend clear failed.
    ClearedLocally { warning: String },
    /// The backend clear failed and local history was kept.
    Kept { error: String },
    Stale(RequestTransitionRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Backend,
    Cache,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationOutcome {
    pub source: HistorySource,
    pub message_count: usize,
    /// Set when the backend could not be reached and an earlier source was kept.
    pub warning: Option<String>,
}

/// Derived pending-request flags for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Indicators {
    pub loading: bool,
    pub typing: bool,
}
