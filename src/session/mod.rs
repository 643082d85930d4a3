//! Active-learning labeling session: bootstrap sampling, exploration and iteration history.

mod errors;
mod exploration;
mod validation;

pub mod controller;
pub mod gateway;
pub mod grouped;
pub mod history;
pub mod initial_sampling;
pub mod types;

pub use controller::{SessionController, SessionOptions, SessionState, SessionView};
pub use errors::SessionError;
pub use gateway::{
    BackendGateway, BackendRequest, GatewayError, GridKind, SnapshotResponse, SubmissionId,
};
pub use grouped::GroupReview;
pub use history::{IterationHistory, PredictionSnapshot};
pub use initial_sampling::{
    DEFAULT_FILTER_PAGE_SIZE, FilterConstraint, FilterPredicate, SamplingStrategy,
};
pub use types::{
    BinaryLabel, DataPoint, GridPrediction, GroupDefinition, GroupDefinitionError, GroupedAnswer,
    GroupedLabel, Label, LabeledPoint, LabelingMode, LearnerKind, PointId, SessionPhase,
};
