//! Aggregate root trait and optimistic versioning.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Small on purpose: the stock domain keeps policy in free functions and only
/// needs identity and a row version from its records.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the persisted state.
    ///
    /// `0` means the aggregate has never been committed.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a persisted row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The row must not exist yet (first commit inserts it).
    Absent,
    /// The row must be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation derived from an aggregate loaded (or lazily created) in memory.
    pub fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        match aggregate.version() {
            0 => ExpectedVersion::Absent,
            v => ExpectedVersion::Exact(v),
        }
    }

    /// `actual` is `None` when no row exists.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }

    /// Version the row will carry once the pending write commits.
    pub fn next(self) -> u64 {
        match self {
            ExpectedVersion::Absent => 1,
            ExpectedVersion::Exact(v) => v + 1,
        }
    }
}
