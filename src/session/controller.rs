//! Labeling session state machine.
//!
//! `SessionController` is the single writer of [`SessionState`]. Every mutation
//! validates first, then changes state and returns the backend requests the caller must
//! run. Replies come back through the `receive_*`/`submission_*` entry points. At most one
//! label submission is outstanding; labels committed meanwhile wait in the pending batch.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::SessionError;
use super::exploration::ExplorationController;
use super::gateway::{BackendRequest, SnapshotResponse, SubmissionId};
use super::grouped;
use super::history::{IterationHistory, PredictionSnapshot};
use super::initial_sampling::{FilterPredicate, InitialSamplingController, SamplingStrategy};
use super::types::{
    DataPoint, GroupedAnswer, Label, LabeledPoint, LabelingMode, LearnerKind, PointId,
    SessionPhase,
};
use super::validation;

/// Settings fixed for the lifetime of a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub mode: LabelingMode,
    pub learner: LearnerKind,
    pub initial_strategy: SamplingStrategy,
    pub filter_page_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: LabelingMode::Scalar,
            learner: LearnerKind::Standard,
            initial_strategy: SamplingStrategy::Random,
            filter_page_size: super::initial_sampling::DEFAULT_FILTER_PAGE_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    phase: SessionPhase,
    points_to_label: Vec<DataPoint>,
    pending_batch: Vec<LabeledPoint>,
    all_labeled_points: Vec<Vec<LabeledPoint>>,
    has_positive: bool,
    has_negative: bool,
}

impl SessionState {
    fn seeded(points_to_label: Vec<DataPoint>) -> Self {
        Self {
            phase: SessionPhase::InitialSampling,
            points_to_label,
            pending_batch: Vec::new(),
            all_labeled_points: Vec::new(),
            has_positive: false,
            has_negative: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn points_to_label(&self) -> &[DataPoint] {
        &self.points_to_label
    }

    /// Labels committed but not yet acknowledged by the backend.
    pub fn pending_batch(&self) -> &[LabeledPoint] {
        &self.pending_batch
    }

    /// Acknowledged submissions, one batch each.
    pub fn all_labeled_points(&self) -> &[Vec<LabeledPoint>] {
        &self.all_labeled_points
    }

    pub fn has_positive(&self) -> bool {
        self.has_positive
    }

    pub fn has_negative(&self) -> bool {
        self.has_negative
    }
}

#[derive(Clone, Debug)]
struct InFlight {
    id: SubmissionId,
    batch: Vec<LabeledPoint>,
    /// Issued during exploration, so its acknowledgement yields a snapshot.
    exploring: bool,
}

/// Label submission channel; only `Idle` may issue a new submission.
#[derive(Clone, Debug)]
enum SubmissionSlot {
    Idle,
    InFlight(InFlight),
    /// The first `len` pending points failed to submit and wait for a retry.
    Failed { len: usize, exploring: bool },
}

/// Read-only copy of the session for renderers.
#[derive(Clone, Debug)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: SessionState,
    pub strategy: SamplingStrategy,
    pub submission_in_flight: bool,
    pub awaiting_retry: bool,
    pub history_len: usize,
    pub current_iteration: usize,
    pub current_snapshot: Option<Arc<PredictionSnapshot>>,
}

#[derive(Debug)]
pub struct SessionController {
    id: Uuid,
    mode: LabelingMode,
    state: SessionState,
    /// Every id committed with a label, acknowledged or not.
    labeled_ids: HashSet<PointId>,
    slot: SubmissionSlot,
    next_submission: u64,
    sampling: InitialSamplingController,
    exploration: ExplorationController,
}

impl SessionController {
    /// Start a session in the bootstrap phase with an externally supplied first batch.
    pub fn new(options: SessionOptions, initial_candidates: Vec<DataPoint>) -> Self {
        let id = Uuid::new_v4();
        let mut seen = HashSet::new();
        let candidates: Vec<DataPoint> = initial_candidates
            .into_iter()
            .filter(|point| seen.insert(point.id))
            .collect();
        info!(
            session = %id,
            mode = options.mode.name(),
            candidates = candidates.len(),
            "Labeling session started"
        );
        let mut sampling =
            InitialSamplingController::new(options.initial_strategy, options.filter_page_size);
        let offered = sampling.seed(candidates);
        Self {
            id,
            mode: options.mode,
            state: SessionState::seeded(offered),
            labeled_ids: HashSet::new(),
            slot: SubmissionSlot::Idle,
            next_submission: 0,
            sampling,
            exploration: ExplorationController::new(options.learner),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> &LabelingMode {
        &self.mode
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &IterationHistory {
        self.exploration.history()
    }

    pub fn submission_in_flight(&self) -> bool {
        matches!(self.slot, SubmissionSlot::InFlight(_))
    }

    pub fn awaiting_retry(&self) -> bool {
        matches!(self.slot, SubmissionSlot::Failed { .. })
    }

    pub fn view(&self) -> SessionView {
        let history = self.exploration.history();
        SessionView {
            session_id: self.id,
            state: self.state.clone(),
            strategy: self.sampling.strategy(),
            submission_in_flight: self.submission_in_flight(),
            awaiting_retry: self.awaiting_retry(),
            history_len: history.len(),
            current_iteration: history.current_iteration(),
            current_snapshot: history.current().cloned(),
        }
    }

    /// Label the pending point at `point_index` with `0` or `1`.
    pub fn label_point(
        &mut self,
        point_index: usize,
        label: i64,
    ) -> Result<Vec<BackendRequest>, SessionError> {
        if !matches!(self.mode, LabelingMode::Scalar) {
            return Err(SessionError::ModeMismatch { expected: "scalar" });
        }
        let label = validation::scalar_label(label)?;
        validation::point_index(point_index, self.state.points_to_label.len())?;
        Ok(self.commit(point_index, Label::Scalar(label)))
    }

    /// Label the pending point at `point_index` group by group.
    pub fn label_grouped_point(
        &mut self,
        point_index: usize,
        answer: GroupedAnswer,
    ) -> Result<Vec<BackendRequest>, SessionError> {
        let LabelingMode::Grouped(groups) = &self.mode else {
            return Err(SessionError::ModeMismatch { expected: "grouped" });
        };
        validation::point_index(point_index, self.state.points_to_label.len())?;
        let point_id = self.state.points_to_label[point_index].id;
        let label = grouped::label(point_id, &answer, groups)?;
        Ok(self.commit(point_index, Label::Grouped(label)))
    }

    /// Append backend-supplied candidates. Any already tracked id rejects the whole call.
    pub fn receive_candidates(&mut self, new_points: Vec<DataPoint>) -> Result<(), SessionError> {
        let mut incoming = HashSet::new();
        for point in &new_points {
            if self.is_tracked(point.id) || !incoming.insert(point.id) {
                return Err(SessionError::DuplicatePoint { id: point.id });
            }
        }
        debug!(count = new_points.len(), "Received candidates");
        self.state.points_to_label.extend(new_points);
        Ok(())
    }

    /// Feed one prediction grid; returns the iterations it completed.
    pub fn receive_prediction_snapshot(&mut self, response: SnapshotResponse) -> Vec<usize> {
        self.exploration.receive(response)
    }

    /// A prediction grid request failed; the snapshot is dropped.
    pub fn snapshot_failed(&mut self, ticket: SubmissionId) -> Vec<usize> {
        self.exploration.discard(ticket)
    }

    /// The outstanding label submission was acknowledged with `new_candidates`.
    pub fn submission_succeeded(&mut self, new_candidates: Vec<DataPoint>) -> Vec<BackendRequest> {
        let mut requests = Vec::new();
        match std::mem::replace(&mut self.slot, SubmissionSlot::Idle) {
            SubmissionSlot::InFlight(in_flight) => {
                info!(
                    submission = in_flight.id.0,
                    points = in_flight.batch.len(),
                    "Submission acknowledged"
                );
                if !in_flight.batch.is_empty() {
                    self.state.all_labeled_points.push(in_flight.batch.clone());
                    if in_flight.exploring {
                        let labeled_batches = self.state.all_labeled_points.len();
                        requests.extend(self.exploration.acknowledged(
                            in_flight.id,
                            in_flight.batch,
                            labeled_batches,
                        ));
                    }
                }
            }
            other => {
                warn!("Acknowledgement without an outstanding submission");
                self.slot = other;
            }
        }
        self.accept_submission_candidates(new_candidates);
        match self.state.phase {
            SessionPhase::InitialSampling => requests.extend(self.advance_bootstrap()),
            SessionPhase::Exploration => requests.extend(self.flush_exploration()),
        }
        requests
    }

    /// The outstanding label submission failed. Its points return to the front of the
    /// pending batch until [`Self::retry_submission`] is called.
    pub fn submission_failed(&mut self, reason: impl Into<String>) -> SessionError {
        let reason = reason.into();
        match std::mem::replace(&mut self.slot, SubmissionSlot::Idle) {
            SubmissionSlot::InFlight(in_flight) => {
                warn!(submission = in_flight.id.0, %reason, "Submission failed");
                let len = in_flight.batch.len();
                let mut restored = in_flight.batch;
                restored.append(&mut self.state.pending_batch);
                self.state.pending_batch = restored;
                self.slot = SubmissionSlot::Failed {
                    len,
                    exploring: in_flight.exploring,
                };
            }
            other => {
                warn!(%reason, "Failure reported without an outstanding submission");
                self.slot = other;
            }
        }
        SessionError::RequestFailed(reason)
    }

    /// Re-issue the submission that last failed.
    pub fn retry_submission(&mut self) -> Result<Vec<BackendRequest>, SessionError> {
        let SubmissionSlot::Failed { len, exploring } = self.slot else {
            return Err(SessionError::NothingToRetry);
        };
        let len = len.min(self.state.pending_batch.len());
        let batch: Vec<LabeledPoint> = self.state.pending_batch.drain(..len).collect();
        self.slot = SubmissionSlot::Idle;
        info!(points = batch.len(), "Retrying submission");
        Ok(vec![self.submit(batch, exploring)])
    }

    /// Switch bootstrap acquisition strategy; progress flags are kept.
    pub fn set_sampling_strategy(
        &mut self,
        strategy: SamplingStrategy,
    ) -> Result<Vec<BackendRequest>, SessionError> {
        self.require_initial_sampling()?;
        let needs_candidates =
            self.sampling
                .switch_to(strategy, &mut self.state.points_to_label, &self.labeled_ids);
        info!(?strategy, "Sampling strategy selected");
        if needs_candidates && matches!(self.slot, SubmissionSlot::Idle) {
            let batch = std::mem::take(&mut self.state.pending_batch);
            return Ok(vec![self.submit(batch, false)]);
        }
        Ok(Vec::new())
    }

    /// Ask the backend for points matching every predicate. Activates filter sampling.
    pub fn request_filtered_points(
        &mut self,
        predicates: Vec<FilterPredicate>,
    ) -> Result<Vec<BackendRequest>, SessionError> {
        self.require_initial_sampling()?;
        for predicate in &predicates {
            predicate.validate()?;
        }
        if self.sampling.strategy() != SamplingStrategy::Filter {
            self.sampling.switch_to(
                SamplingStrategy::Filter,
                &mut self.state.points_to_label,
                &self.labeled_ids,
            );
        }
        debug!(predicates = predicates.len(), "Requesting filtered points");
        Ok(vec![BackendRequest::SubmitFilters { predicates }])
    }

    /// Replace the filter page with the backend's matches. Returns how many are offered.
    pub fn receive_filtered_points(&mut self, points: Vec<DataPoint>) -> usize {
        if self.state.phase != SessionPhase::InitialSampling
            || self.sampling.strategy() != SamplingStrategy::Filter
        {
            warn!(
                count = points.len(),
                "Dropping filter results that arrived after filtering ended"
            );
            return 0;
        }
        let matched = points.len();
        let offered =
            self.sampling
                .replace_page(points, &mut self.state.points_to_label, &self.labeled_ids);
        info!(matched, offered, "Filter results received");
        offered
    }

    /// Ask the backend for a row the labeler already knows about.
    pub fn request_specific_point(
        &mut self,
        row_id: PointId,
    ) -> Result<Vec<BackendRequest>, SessionError> {
        self.require_initial_sampling()?;
        if self.is_tracked(row_id) {
            return Err(SessionError::DuplicatePoint { id: row_id });
        }
        Ok(vec![BackendRequest::FetchSpecificPoint { row_id }])
    }

    pub fn previous_iteration(&mut self) -> usize {
        self.exploration.history_mut().previous_iteration()
    }

    pub fn next_iteration(&mut self) -> usize {
        self.exploration.history_mut().next_iteration()
    }

    /// Every point acknowledged up to and including `iteration`, bootstrap batches and
    /// batches whose snapshot was dropped included.
    pub fn labeled_through(&self, iteration: usize) -> Vec<&LabeledPoint> {
        let batches = self.exploration.history().labeled_batches_through(iteration);
        self.state
            .all_labeled_points
            .iter()
            .take(batches)
            .flatten()
            .collect()
    }

    fn commit(&mut self, point_index: usize, label: Label) -> Vec<BackendRequest> {
        let point = self.state.points_to_label.remove(point_index);
        let overall = label.overall();
        debug!(point = %point.id, ?overall, "Label committed");
        self.labeled_ids.insert(point.id);
        if overall.is_positive() {
            self.state.has_positive = true;
        } else {
            self.state.has_negative = true;
        }
        self.state.pending_batch.push(LabeledPoint { point, label });

        match self.state.phase {
            SessionPhase::InitialSampling => self.advance_bootstrap(),
            SessionPhase::Exploration => self.flush_exploration(),
        }
    }

    fn advance_bootstrap(&mut self) -> Vec<BackendRequest> {
        let idle = matches!(self.slot, SubmissionSlot::Idle);
        if self.state.has_positive && self.state.has_negative {
            self.state.phase = SessionPhase::Exploration;
            let discarded = self.state.points_to_label.len() + self.sampling.finish();
            self.state.points_to_label.clear();
            info!(
                labeled = self.state.pending_batch.len(),
                discarded, "Positive and negative examples found; exploration started"
            );
            if !idle {
                self.exploration.defer_bootstrap_flush();
                return Vec::new();
            }
            let batch = std::mem::take(&mut self.state.pending_batch);
            return vec![self.submit(batch, true)];
        }
        if self.state.points_to_label.is_empty() && idle && !self.state.pending_batch.is_empty() {
            let batch = std::mem::take(&mut self.state.pending_batch);
            return vec![self.submit(batch, false)];
        }
        Vec::new()
    }

    fn flush_exploration(&mut self) -> Vec<BackendRequest> {
        if !matches!(self.slot, SubmissionSlot::Idle) {
            return Vec::new();
        }
        let batch = self.exploration.next_batch(&mut self.state.pending_batch);
        if batch.is_empty() {
            return Vec::new();
        }
        vec![self.submit(batch, true)]
    }

    fn submit(&mut self, batch: Vec<LabeledPoint>, exploring: bool) -> BackendRequest {
        self.next_submission += 1;
        let id = SubmissionId(self.next_submission);
        info!(submission = id.0, points = batch.len(), exploring, "Submitting labels");
        self.slot = SubmissionSlot::InFlight(InFlight {
            id,
            batch: batch.clone(),
            exploring,
        });
        BackendRequest::SubmitLabels {
            submission: id,
            points: batch,
        }
    }

    /// Candidates from a submission reply; repeats are dropped rather than failing the
    /// acknowledgement.
    fn accept_submission_candidates(&mut self, candidates: Vec<DataPoint>) {
        let mut accepted = Vec::with_capacity(candidates.len());
        let mut incoming = HashSet::new();
        for point in candidates {
            if self.is_tracked(point.id) || !incoming.insert(point.id) {
                warn!(point = %point.id, "Backend resent a tracked point; skipping it");
                continue;
            }
            accepted.push(point);
        }
        if accepted.is_empty() && self.state.points_to_label.is_empty() {
            warn!("Backend returned no new candidates");
        }
        if self.state.phase == SessionPhase::InitialSampling
            && self.sampling.strategy() == SamplingStrategy::Filter
        {
            self.sampling.park(accepted);
        } else {
            self.state.points_to_label.extend(accepted);
        }
    }

    fn is_tracked(&self, id: PointId) -> bool {
        self.labeled_ids.contains(&id)
            || self.state.points_to_label.iter().any(|point| point.id == id)
            || self.sampling.parked_random().iter().any(|point| point.id == id)
    }

    fn require_initial_sampling(&self) -> Result<(), SessionError> {
        match self.state.phase {
            SessionPhase::InitialSampling => Ok(()),
            actual => Err(SessionError::PhaseMismatch { actual }),
        }
    }
}
