//! Per-group label encoding for grouped (factorized) labeling.
//!
//! A grouped label is a vector with one flag per variable group; a set flag means that
//! group on its own rules the point out. The overall class is positive only when no
//! group rejects the point.

use std::collections::BTreeSet;

use super::errors::SessionError;
use super::types::{BinaryLabel, GroupDefinition, GroupedAnswer, GroupedLabel, PointId};
use super::validation;

/// Groups the labeler has marked as rejecting one point so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupReview {
    pub point_id: PointId,
    pub rejected_groups: BTreeSet<usize>,
}

impl GroupReview {
    pub fn for_point(point_id: PointId) -> Self {
        Self {
            point_id,
            rejected_groups: BTreeSet::new(),
        }
    }

    /// Flip the verdict of one group.
    pub fn toggle(&mut self, group: usize) {
        if !self.rejected_groups.remove(&group) {
            self.rejected_groups.insert(group);
        }
    }
}

/// One flag per group, `true` where the review rejects that group.
pub fn encode(review: &GroupReview, groups: &GroupDefinition) -> Result<Vec<bool>, SessionError> {
    if let Some(&group) = review
        .rejected_groups
        .iter()
        .find(|&&group| group >= groups.len())
    {
        return Err(SessionError::UnknownGroup {
            group,
            count: groups.len(),
        });
    }
    Ok((0..groups.len())
        .map(|group| review.rejected_groups.contains(&group))
        .collect())
}

pub fn decode_overall(per_group_negative: &[bool]) -> BinaryLabel {
    if per_group_negative.iter().any(|&negative| negative) {
        BinaryLabel::Negative
    } else {
        BinaryLabel::Positive
    }
}

/// Check an answer against the group definition without building a label.
pub fn validate(
    point_id: PointId,
    answer: &GroupedAnswer,
    group_count: usize,
) -> Result<(), SessionError> {
    match answer {
        GroupedAnswer::Accept => Ok(()),
        GroupedAnswer::Reject { per_group_negative } => {
            validation::rejection_flags(point_id, per_group_negative, group_count)
        }
    }
}

/// Build the committed label for `point_id`.
pub fn label(
    point_id: PointId,
    answer: &GroupedAnswer,
    groups: &GroupDefinition,
) -> Result<GroupedLabel, SessionError> {
    validate(point_id, answer, groups.len())?;
    let per_group_negative = match answer {
        GroupedAnswer::Accept => vec![false; groups.len()],
        GroupedAnswer::Reject { per_group_negative } => per_group_negative.clone(),
    };
    let overall = decode_overall(&per_group_negative);
    Ok(GroupedLabel {
        point_id,
        per_group_negative,
        overall,
    })
}

/// Backend representation: `1` when the group accepts the point, `0` when it rejects it.
pub fn to_wire(per_group_negative: &[bool]) -> Vec<i8> {
    per_group_negative
        .iter()
        .map(|&negative| if negative { 0 } else { 1 })
        .collect()
}

/// Inverse of [`to_wire`]; `-1` is also read as a rejection.
pub fn from_wire(labels: &[i64]) -> Result<Vec<bool>, SessionError> {
    labels
        .iter()
        .map(|&value| match value {
            1 => Ok(false),
            0 | -1 => Ok(true),
            other => Err(SessionError::InvalidLabel(other)),
        })
        .collect()
}
