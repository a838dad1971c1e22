//! Stable ID newtypes for search entities.
//!
//! Coverage targets, individuals and SQL insertions each get their own
//! newtype so one kind of id cannot be passed where another is expected.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Coverage target identifier.
///
/// Non-negative ids come from the driver (lines, branches, ...). Negative
/// ids are local targets minted by the engine itself, such as "status 200
/// reached on GET /items/{id}".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub i32);

impl TargetId {
    /// Whether this target was minted locally rather than reported by the driver.
    pub fn is_local(self) -> bool {
        self.0 < 0
    }
}

/// Identity of one individual, used by lineage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndividualId(pub u64);

static NEXT_INDIVIDUAL: AtomicU64 = AtomicU64::new(1);

impl IndividualId {
    /// Allocates a process-unique individual id.
    pub fn fresh() -> Self {
        IndividualId(NEXT_INDIVIDUAL.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stable identity of one SQL insertion.
///
/// Primary-key genes carry the id of the insertion that owns them; foreign
/// keys reference a primary key by this id, never by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InsertionId(pub u64);

// Display implementations -- just print the inner value.

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndividualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InsertionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_targets_are_negative() {
        assert!(TargetId(-3).is_local());
        assert!(!TargetId(0).is_local());
        assert!(!TargetId(17).is_local());
    }

    #[test]
    fn fresh_individual_ids_are_unique() {
        let a = IndividualId::fresh();
        let b = IndividualId::fresh();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(TargetId(-2).to_string(), "-2");
        assert_eq!(InsertionId(9).to_string(), "9");
    }
}
