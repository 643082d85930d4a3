//! Append-only log of model prediction snapshots with a playback cursor.

use std::sync::Arc;

use super::types::{GridPrediction, LabeledPoint};

/// Backend predictions captured after one acknowledged submission.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionSnapshot {
    /// Position of this snapshot in the history.
    pub iteration_index: usize,
    /// Points whose submission produced this snapshot.
    pub labeled_batch: Vec<LabeledPoint>,
    /// Acknowledged batches up to and including this iteration, bootstrap ones included.
    pub labeled_batches: usize,
    pub grid_predictions: Vec<GridPrediction>,
    /// Present only for factorized learners.
    pub grouped_grid_predictions: Option<Vec<GridPrediction>>,
}

#[derive(Clone, Debug, Default)]
pub struct IterationHistory {
    entries: Vec<Arc<PredictionSnapshot>>,
    current: usize,
}

impl IterationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_iteration(&self) -> usize {
        self.current
    }

    /// True when the cursor sits on the newest snapshot (or nothing has been recorded yet).
    pub fn is_following_latest(&self) -> bool {
        self.entries.is_empty() || self.current + 1 == self.entries.len()
    }

    /// Append a snapshot, keeping the cursor on the newest entry only if it was already there.
    pub fn append(
        &mut self,
        labeled_batch: Vec<LabeledPoint>,
        labeled_batches: usize,
        grid_predictions: Vec<GridPrediction>,
        grouped_grid_predictions: Option<Vec<GridPrediction>>,
    ) -> usize {
        let follow = self.is_following_latest();
        let iteration_index = self.entries.len();
        self.entries.push(Arc::new(PredictionSnapshot {
            iteration_index,
            labeled_batch,
            labeled_batches,
            grid_predictions,
            grouped_grid_predictions,
        }));
        if follow {
            self.current = iteration_index;
        }
        iteration_index
    }

    pub fn previous_iteration(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.current
    }

    pub fn next_iteration(&mut self) -> usize {
        let last = self.entries.len().saturating_sub(1);
        self.current = (self.current + 1).min(last);
        self.current
    }

    pub fn get(&self, iteration: usize) -> Option<&Arc<PredictionSnapshot>> {
        self.entries.get(iteration)
    }

    pub fn current(&self) -> Option<&Arc<PredictionSnapshot>> {
        self.entries.get(self.current)
    }

    pub fn entries(&self) -> &[Arc<PredictionSnapshot>] {
        &self.entries
    }

    /// Number of acknowledged batches labeled up to and including `iteration`. Iterations
    /// past the end count as the latest one.
    pub fn labeled_batches_through(&self, iteration: usize) -> usize {
        let last = self.entries.len().saturating_sub(1);
        self.entries
            .get(iteration.min(last))
            .map_or(0, |entry| entry.labeled_batches)
    }
}
