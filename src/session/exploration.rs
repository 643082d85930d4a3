//! Steady-state labeling: one point per submission, one snapshot per acknowledgement.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::gateway::{BackendRequest, GridKind, SnapshotResponse, SubmissionId};
use super::history::IterationHistory;
use super::types::{GridPrediction, LabeledPoint, LearnerKind};

/// Grids collected so far for one acknowledged submission.
#[derive(Debug)]
struct PartialSnapshot {
    labeled_batch: Vec<LabeledPoint>,
    labeled_batches: usize,
    grid: Option<Vec<GridPrediction>>,
    grouped_grid: Option<Vec<GridPrediction>>,
}

impl PartialSnapshot {
    fn is_complete(&self, learner: LearnerKind) -> bool {
        self.grid.is_some()
            && (learner == LearnerKind::Standard || self.grouped_grid.is_some())
    }
}

#[derive(Debug)]
pub struct ExplorationController {
    learner: LearnerKind,
    history: IterationHistory,
    assembling: BTreeMap<SubmissionId, PartialSnapshot>,
    /// The bootstrap batch is still queued behind an earlier submission.
    flush_whole_batch: bool,
}

impl ExplorationController {
    pub fn new(learner: LearnerKind) -> Self {
        Self {
            learner,
            history: IterationHistory::new(),
            assembling: BTreeMap::new(),
            flush_whole_batch: false,
        }
    }

    pub fn history(&self) -> &IterationHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut IterationHistory {
        &mut self.history
    }

    /// Send the whole pending batch with the next flush instead of a single point.
    pub fn defer_bootstrap_flush(&mut self) {
        self.flush_whole_batch = true;
    }

    /// Take the points that make up the next submission, oldest first.
    pub fn next_batch(&mut self, pending: &mut Vec<LabeledPoint>) -> Vec<LabeledPoint> {
        if pending.is_empty() {
            return Vec::new();
        }
        if std::mem::take(&mut self.flush_whole_batch) {
            std::mem::take(pending)
        } else {
            vec![pending.remove(0)]
        }
    }

    /// Open a snapshot for an acknowledged submission and request its grids.
    ///
    /// `labeled_batches` counts every batch acknowledged so far, this one included.
    pub fn acknowledged(
        &mut self,
        submission: SubmissionId,
        labeled_batch: Vec<LabeledPoint>,
        labeled_batches: usize,
    ) -> Vec<BackendRequest> {
        self.assembling.insert(
            submission,
            PartialSnapshot {
                labeled_batch,
                labeled_batches,
                grid: None,
                grouped_grid: None,
            },
        );
        let mut requests = vec![BackendRequest::FetchPredictions {
            ticket: submission,
            kind: GridKind::Model,
        }];
        if self.learner == LearnerKind::Factorized {
            requests.push(BackendRequest::FetchPredictions {
                ticket: submission,
                kind: GridKind::Grouped,
            });
        }
        requests
    }

    /// Store one grid; returns the iterations appended as a result.
    pub fn receive(&mut self, response: SnapshotResponse) -> Vec<usize> {
        let Some(partial) = self.assembling.get_mut(&response.ticket) else {
            warn!(
                ticket = response.ticket.0,
                "Ignoring predictions for an unknown or finished snapshot"
            );
            return Vec::new();
        };
        let slot = match response.kind {
            GridKind::Model => &mut partial.grid,
            GridKind::Grouped => &mut partial.grouped_grid,
        };
        if slot.is_some() {
            warn!(ticket = response.ticket.0, kind = ?response.kind, "Duplicate prediction grid");
        }
        *slot = Some(response.predictions);
        self.drain_completed()
    }

    /// Drop a snapshot whose grid could not be fetched.
    pub fn discard(&mut self, ticket: SubmissionId) -> Vec<usize> {
        if self.assembling.remove(&ticket).is_some() {
            warn!(ticket = ticket.0, "Discarded prediction snapshot");
        }
        self.drain_completed()
    }

    /// Append finished snapshots in submission order; stop at the first one still waiting.
    fn drain_completed(&mut self) -> Vec<usize> {
        let mut appended = Vec::new();
        while let Some(entry) = self.assembling.first_entry() {
            if !entry.get().is_complete(self.learner) {
                break;
            }
            let (ticket, partial) = entry.remove_entry();
            let grouped = match self.learner {
                LearnerKind::Factorized => partial.grouped_grid,
                LearnerKind::Standard => None,
            };
            let grid = partial.grid.unwrap_or_default();
            let iteration = self
                .history
                .append(partial.labeled_batch, partial.labeled_batches, grid, grouped);
            info!(ticket = ticket.0, iteration, "Recorded prediction snapshot");
            appended.push(iteration);
        }
        if !self.assembling.is_empty() {
            debug!(waiting = self.assembling.len(), "Snapshots still assembling");
        }
        appended
    }
}
