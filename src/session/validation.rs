//! Checks run before a label is committed.
//!
//! Nothing here touches session state; callers validate first and mutate only on `Ok`.

use super::errors::SessionError;
use super::types::{BinaryLabel, PointId};

/// Parse an integer label coming from the front end.
pub fn scalar_label(raw: i64) -> Result<BinaryLabel, SessionError> {
    match raw {
        0 => Ok(BinaryLabel::Negative),
        1 => Ok(BinaryLabel::Positive),
        other => Err(SessionError::InvalidLabel(other)),
    }
}

pub fn point_index(index: usize, len: usize) -> Result<(), SessionError> {
    if index < len {
        Ok(())
    } else {
        Err(SessionError::OutOfRange { index, len })
    }
}

/// A rejection must carry one flag per group and blame at least one of them.
pub fn rejection_flags(
    point_id: PointId,
    per_group_negative: &[bool],
    group_count: usize,
) -> Result<(), SessionError> {
    if per_group_negative.len() != group_count {
        return Err(SessionError::GroupCountMismatch {
            expected: group_count,
            actual: per_group_negative.len(),
        });
    }
    if !per_group_negative.iter().any(|&negative| negative) {
        return Err(SessionError::EmptyRejection { point_id });
    }
    Ok(())
}
