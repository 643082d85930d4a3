//! Bootstrap phase: find one positive and one negative example.
//!
//! Two acquisition strategies feed the same commit path. Random sampling walks a pool
//! refilled by label submissions; filter sampling asks the backend for points matching
//! per-column predicates and keeps one bounded page of results. The controller only
//! manages where candidates live; the positive/negative progress stays in the session
//! state and survives strategy switches.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::SessionError;
use super::types::{DataPoint, PointId};

/// Default number of filtered points kept client-side.
pub const DEFAULT_FILTER_PAGE_SIZE: usize = 25;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    #[default]
    Random,
    Filter,
}

/// Constraint applied to one column.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterConstraint {
    /// Inclusive numeric range; a missing bound is unbounded.
    Range { min: Option<f64>, max: Option<f64> },
    /// Categorical values the column must take.
    Values(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterPredicate {
    pub column_name: String,
    pub constraint: FilterConstraint,
}

impl FilterPredicate {
    pub fn range(column_name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            column_name: column_name.into(),
            constraint: FilterConstraint::Range { min, max },
        }
    }

    pub fn values(column_name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            column_name: column_name.into(),
            constraint: FilterConstraint::Values(values),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let invalid = |reason: &str| SessionError::InvalidPredicate {
            column: self.column_name.clone(),
            reason: reason.to_string(),
        };
        if self.column_name.trim().is_empty() {
            return Err(invalid("column name is empty"));
        }
        match &self.constraint {
            FilterConstraint::Range { min: None, max: None } => Err(invalid("range has no bound")),
            FilterConstraint::Range { min, max } => {
                if min.is_some_and(f64::is_nan) || max.is_some_and(f64::is_nan) {
                    return Err(invalid("bound is NaN"));
                }
                if let (Some(min), Some(max)) = (min, max)
                    && min > max
                {
                    return Err(invalid("minimum is larger than maximum"));
                }
                Ok(())
            }
            FilterConstraint::Values(values) if values.is_empty() => {
                Err(invalid("no categorical value selected"))
            }
            FilterConstraint::Values(_) => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InitialSamplingController {
    strategy: SamplingStrategy,
    /// Random pool set aside while the filter strategy is active.
    parked_random: Vec<DataPoint>,
    /// Ids on the current filter page. Other offered points were requested one by one
    /// and outlive page changes.
    page_ids: HashSet<PointId>,
    page_size: usize,
}

impl InitialSamplingController {
    pub fn new(strategy: SamplingStrategy, page_size: usize) -> Self {
        Self {
            strategy,
            parked_random: Vec::new(),
            page_ids: HashSet::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    pub fn parked_random(&self) -> &[DataPoint] {
        &self.parked_random
    }

    /// Place the session's first candidates; returns the ones to offer right away.
    ///
    /// Under filter sampling they form the random pool until the labeler switches to it.
    pub fn seed(&mut self, candidates: Vec<DataPoint>) -> Vec<DataPoint> {
        match self.strategy {
            SamplingStrategy::Random => candidates,
            SamplingStrategy::Filter => {
                self.parked_random = candidates;
                Vec::new()
            }
        }
    }

    /// Switch strategy, swapping the offered list.
    ///
    /// Returns `true` when the random strategy became active with nothing to offer, so the
    /// caller should fetch candidates.
    pub fn switch_to(
        &mut self,
        strategy: SamplingStrategy,
        points_to_label: &mut Vec<DataPoint>,
        labeled: &HashSet<PointId>,
    ) -> bool {
        if strategy == self.strategy {
            return strategy == SamplingStrategy::Random && points_to_label.is_empty();
        }
        self.strategy = strategy;
        match strategy {
            SamplingStrategy::Filter => {
                self.parked_random = std::mem::take(points_to_label);
                debug!(
                    parked = self.parked_random.len(),
                    "Parked random candidates for filter sampling"
                );
                false
            }
            SamplingStrategy::Random => {
                let requested = self.take_requested(points_to_label);
                let mut restored = std::mem::take(&mut self.parked_random);
                restored.retain(|point| !labeled.contains(&point.id));
                debug!(
                    restored = restored.len(),
                    kept = requested.len(),
                    "Restored random candidates"
                );
                restored.extend(requested);
                *points_to_label = restored;
                points_to_label.is_empty()
            }
        }
    }

    /// Replace the filter page with `points`. Labeled and repeated points are dropped,
    /// the rest truncated to the page size; individually requested points stay offered
    /// after the page. Returns the page length.
    pub fn replace_page(
        &mut self,
        points: Vec<DataPoint>,
        points_to_label: &mut Vec<DataPoint>,
        labeled: &HashSet<PointId>,
    ) -> usize {
        let requested = self.take_requested(points_to_label);
        let mut seen: HashSet<PointId> = requested.iter().map(|point| point.id).collect();
        let page: Vec<DataPoint> = points
            .into_iter()
            .filter(|point| !labeled.contains(&point.id) && seen.insert(point.id))
            .take(self.page_size)
            .collect();
        self.page_ids = page.iter().map(|point| point.id).collect();
        let offered = page.len();
        *points_to_label = page;
        points_to_label.extend(requested);
        offered
    }

    /// Candidates from a label submission while filtering wait in the random pool.
    pub fn park(&mut self, points: Vec<DataPoint>) {
        self.parked_random.extend(points);
    }

    /// Forget every bootstrap candidate once the phase is over.
    pub fn finish(&mut self) -> usize {
        let dropped = self.parked_random.len();
        self.parked_random.clear();
        self.page_ids.clear();
        dropped
    }

    /// Drain the offered list, keeping only points that are not on the filter page.
    fn take_requested(&mut self, points_to_label: &mut Vec<DataPoint>) -> Vec<DataPoint> {
        let page_ids = std::mem::take(&mut self.page_ids);
        std::mem::take(points_to_label)
            .into_iter()
            .filter(|point| !page_ids.contains(&point.id))
            .collect()
    }
}

impl Default for InitialSamplingController {
    fn default() -> Self {
        Self::new(SamplingStrategy::Random, DEFAULT_FILTER_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(ids: &[u64]) -> Vec<DataPoint> {
        ids.iter().map(|&id| DataPoint::bare(id)).collect()
    }

    fn ids(points: &[DataPoint]) -> Vec<u64> {
        points.iter().map(|point| point.id.0).collect()
    }

    #[test]
    fn range_predicate_requires_ordered_bounds() {
        assert!(FilterPredicate::range("price", Some(1.0), Some(5.0)).validate().is_ok());
        assert!(FilterPredicate::range("price", None, Some(5.0)).validate().is_ok());
        let err = FilterPredicate::range("price", Some(6.0), Some(5.0))
            .validate()
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidPredicate { ref column, .. } if column == "price"));
        assert!(FilterPredicate::range("price", None, None).validate().is_err());
        assert!(FilterPredicate::range("price", Some(f64::NAN), None).validate().is_err());
    }

    #[test]
    fn categorical_predicate_needs_a_value() {
        assert!(FilterPredicate::values("brand", vec![]).validate().is_err());
        assert!(FilterPredicate::values("brand", vec!["bmw".into()]).validate().is_ok());
        assert!(FilterPredicate::values(" ", vec!["bmw".into()]).validate().is_err());
    }

    #[test]
    fn switching_to_filter_parks_and_back_restores_unlabeled() {
        let mut controller = InitialSamplingController::default();
        let mut offered = points(&[1, 2, 3]);
        let mut labeled = HashSet::new();

        assert!(!controller.switch_to(SamplingStrategy::Filter, &mut offered, &labeled));
        assert!(offered.is_empty());
        assert_eq!(ids(controller.parked_random()), vec![1, 2, 3]);

        controller.replace_page(points(&[2, 9]), &mut offered, &labeled);
        labeled.insert(PointId(2));
        let needs_fetch = controller.switch_to(SamplingStrategy::Random, &mut offered, &labeled);
        assert!(!needs_fetch);
        assert_eq!(ids(&offered), vec![1, 3]);
    }

    #[test]
    fn restoring_an_empty_pool_asks_for_candidates() {
        let mut controller = InitialSamplingController::new(SamplingStrategy::Filter, 5);
        let mut offered = Vec::new();
        assert!(controller.switch_to(SamplingStrategy::Random, &mut offered, &HashSet::new()));
    }

    #[test]
    fn filter_page_is_bounded_and_skips_labeled() {
        let mut controller = InitialSamplingController::new(SamplingStrategy::Filter, 2);
        let labeled = HashSet::from([PointId(1)]);
        let mut offered = Vec::new();
        let page = controller.replace_page(points(&[1, 2, 2, 3, 4]), &mut offered, &labeled);
        assert_eq!(page, 2);
        assert_eq!(ids(&offered), vec![2, 3]);
    }

    #[test]
    fn requested_points_survive_page_changes_and_switches() {
        let mut controller = InitialSamplingController::new(SamplingStrategy::Filter, 5);
        let labeled = HashSet::new();
        assert!(controller.seed(points(&[1, 2])).is_empty());

        let mut offered = Vec::new();
        controller.replace_page(points(&[5, 6]), &mut offered, &labeled);
        offered.push(DataPoint::bare(42));
        controller.replace_page(points(&[7, 42]), &mut offered, &labeled);
        assert_eq!(ids(&offered), vec![7, 42]);

        controller.switch_to(SamplingStrategy::Random, &mut offered, &labeled);
        assert_eq!(ids(&offered), vec![1, 2, 42]);
    }

    #[test]
    fn random_seed_is_offered_directly() {
        let mut controller = InitialSamplingController::default();
        assert_eq!(ids(&controller.seed(points(&[3, 4]))), vec![3, 4]);
        assert!(controller.parked_random().is_empty());
    }

    #[test]
    fn page_size_is_at_least_one() {
        let mut controller = InitialSamplingController::new(SamplingStrategy::Filter, 0);
        let mut offered = Vec::new();
        controller.replace_page(points(&[1, 2]), &mut offered, &HashSet::new());
        assert_eq!(ids(&offered), vec![1]);
    }
}
