//! Data model shared by the session controllers.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Row identifier of a data point in the backend dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(pub u64);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PointId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A candidate offered to the labeler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: PointId,
    /// Feature values; empty when the backend only sent the row id.
    #[serde(default)]
    pub features: Vec<f64>,
}

impl DataPoint {
    pub fn new(id: u64, features: Vec<f64>) -> Self {
        Self {
            id: PointId(id),
            features,
        }
    }

    /// Point known only by its id.
    pub fn bare(id: u64) -> Self {
        Self::new(id, Vec::new())
    }
}

/// Scalar class of a labeled point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryLabel {
    Negative,
    Positive,
}

impl BinaryLabel {
    pub fn as_int(self) -> i64 {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Self::Positive)
    }
}

/// Per-group verdict for one point in grouped labeling mode.
///
/// Only [`crate::session::grouped`] builds these, so `overall` always agrees with
/// `per_group_negative`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupedLabel {
    pub(crate) point_id: PointId,
    pub(crate) per_group_negative: Vec<bool>,
    pub(crate) overall: BinaryLabel,
}

impl GroupedLabel {
    pub fn point_id(&self) -> PointId {
        self.point_id
    }

    pub fn per_group_negative(&self) -> &[bool] {
        &self.per_group_negative
    }

    pub fn overall(&self) -> BinaryLabel {
        self.overall
    }
}

/// Label attached to a committed point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Scalar(BinaryLabel),
    Grouped(GroupedLabel),
}

impl Label {
    /// Scalar class, derived from the per-group vector for grouped labels.
    pub fn overall(&self) -> BinaryLabel {
        match self {
            Self::Scalar(label) => *label,
            Self::Grouped(grouped) => grouped.overall,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabeledPoint {
    pub point: DataPoint,
    pub label: Label,
}

impl LabeledPoint {
    pub fn id(&self) -> PointId {
        self.point.id
    }
}

/// The user's answer for a point in grouped mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupedAnswer {
    /// The point is interesting; no group rejects it.
    Accept,
    /// The point is not interesting; `per_group_negative[g]` marks each group that rejects it.
    Reject { per_group_negative: Vec<bool> },
}

/// Invalid group layouts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupDefinitionError {
    #[error("Group {group} is empty")]
    EmptyGroup { group: usize },
    #[error("Feature {feature} in group {group} is out of range ({feature_count} feature(s))")]
    FeatureOutOfRange {
        group: usize,
        feature: usize,
        feature_count: usize,
    },
    #[error("Feature {feature} appears in more than one group")]
    Overlap { feature: usize },
}

/// Immutable partition of the feature space into variable groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupDefinition {
    groups: Vec<BTreeSet<usize>>,
}

impl GroupDefinition {
    /// Validate `groups` against `feature_count`; uncovered features become singleton groups.
    pub fn new(
        groups: Vec<BTreeSet<usize>>,
        feature_count: usize,
    ) -> Result<Self, GroupDefinitionError> {
        let mut covered = BTreeSet::new();
        for (group, features) in groups.iter().enumerate() {
            if features.is_empty() {
                return Err(GroupDefinitionError::EmptyGroup { group });
            }
            for &feature in features {
                if feature >= feature_count {
                    return Err(GroupDefinitionError::FeatureOutOfRange {
                        group,
                        feature,
                        feature_count,
                    });
                }
                if !covered.insert(feature) {
                    return Err(GroupDefinitionError::Overlap { feature });
                }
            }
        }
        let mut groups = groups;
        groups.extend(
            (0..feature_count)
                .filter(|feature| !covered.contains(feature))
                .map(|feature| BTreeSet::from([feature])),
        );
        Ok(Self { groups })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[BTreeSet<usize>] {
        &self.groups
    }
}

/// Scalar sessions label whole points; grouped sessions label per variable group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelingMode {
    Scalar,
    Grouped(GroupDefinition),
}

impl LabelingMode {
    pub fn group_definition(&self) -> Option<&GroupDefinition> {
        match self {
            Self::Scalar => None,
            Self::Grouped(groups) => Some(groups),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Grouped(_) => "grouped",
        }
    }
}

/// Active learner running in the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerKind {
    #[default]
    Standard,
    /// Factorized learner; also produces a grouped prediction grid per iteration.
    Factorized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    InitialSampling,
    Exploration,
}

/// Backend prediction for one grid point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPrediction {
    pub point_id: PointId,
    pub label: BinaryLabel,
}
