//! Requests the session asks its backend collaborator to perform.
//!
//! The controllers never talk to the network. Each mutation returns the
//! [`BackendRequest`]s it needs, the owner executes them through a [`BackendGateway`],
//! and feeds the replies back into the controller.

use super::initial_sampling::FilterPredicate;
use super::types::{DataPoint, GridPrediction, LabeledPoint, PointId};

/// Sequence number of a label submission; also identifies the snapshot it yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(pub u64);

/// Which prediction grid a snapshot part carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridKind {
    Model,
    /// Per-group predictions of a factorized learner.
    Grouped,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendRequest {
    /// Send committed labels; the reply carries the next candidates.
    SubmitLabels {
        submission: SubmissionId,
        points: Vec<LabeledPoint>,
    },
    SubmitFilters {
        predicates: Vec<FilterPredicate>,
    },
    /// Fetch one prediction grid describing the model after `ticket` was acknowledged.
    FetchPredictions {
        ticket: SubmissionId,
        kind: GridKind,
    },
    FetchSpecificPoint {
        row_id: PointId,
    },
}

/// One prediction grid answering a [`BackendRequest::FetchPredictions`].
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotResponse {
    pub ticket: SubmissionId,
    pub kind: GridKind,
    pub predictions: Vec<GridPrediction>,
}

/// Failures reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Backend rejected the request: {0}")]
    BadRequest(String),
    #[error("Backend resource not found: {0}")]
    NotFound(String),
    #[error("Server error: {0}")]
    ServerError(String),
    #[error("HTTP error: {0}")]
    Transport(String),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("Response too large: {0}")]
    TooLarge(String),
}

/// Logical operations of the learning backend.
pub trait BackendGateway: Send + Sync {
    /// Submit labeled points and receive new candidates.
    fn submit_labeled_points(&self, points: &[LabeledPoint]) -> Result<Vec<DataPoint>, GatewayError>;

    /// Points matching every predicate.
    fn submit_filter_predicates(
        &self,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<DataPoint>, GatewayError>;

    fn model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError>;

    /// Only meaningful for factorized learners.
    fn grouped_model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError>;

    fn request_specific_point(&self, row_id: PointId) -> Result<DataPoint, GatewayError>;

    /// Whole dataset labeled by the current model, as served by the backend.
    fn labeled_dataset(&self) -> Result<String, GatewayError>;
}
