use super::types::{PointId, SessionPhase};

/// Errors surfaced by the labeling session.
///
/// Every variant is recoverable: a rejected call leaves the session state exactly as it
/// was before the call, so the front end can prompt the user and try again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The point index does not address an entry of the pending candidate list.
    #[error("Point index {index} is out of range ({len} point(s) pending)")]
    OutOfRange { index: usize, len: usize },
    /// A label outside of `{0, 1}` was supplied.
    #[error("Invalid label {0}; expected 0 or 1")]
    InvalidLabel(i64),
    /// A grouped rejection did not mark any group as negative.
    #[error("Point {point_id} was rejected without marking any group as negative")]
    EmptyRejection { point_id: PointId },
    /// The per-group vector does not match the number of variable groups.
    #[error("Expected {expected} group label(s), got {actual}")]
    GroupCountMismatch { expected: usize, actual: usize },
    /// A group index does not exist in the session's group definition.
    #[error("Group {group} does not exist ({count} group(s) defined)")]
    UnknownGroup { group: usize, count: usize },
    /// The backend sent a point that is already pending or labeled.
    #[error("Point {id} is already tracked by this session")]
    DuplicatePoint { id: PointId },
    /// The call does not match the session's labeling mode.
    #[error("Operation requires {expected} labeling mode")]
    ModeMismatch { expected: &'static str },
    /// The call is only valid in another phase.
    #[error("Operation is not available during {actual:?}")]
    PhaseMismatch { actual: SessionPhase },
    /// A filter predicate is malformed.
    #[error("Invalid filter on {column}: {reason}")]
    InvalidPredicate { column: String, reason: String },
    /// A retry was requested but no submission is waiting.
    #[error("No pending submission to retry")]
    NothingToRetry,
    /// The backend collaborator failed to answer a request.
    #[error("Request failed: {0}")]
    RequestFailed(String),
}
