// ABOUTME: One-based replica index for a scaled service's containers.
// ABOUTME: Backed by NonZeroU32 so an out-of-range or zero index is unrepresentable.

use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicaIndexError {
    #[error("replica index must be at least 1, got 0")]
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaIndex(NonZeroU32);

impl ReplicaIndex {
    pub const FIRST: Self = Self(NonZeroU32::new(1).expect("1 is non-zero"));

    pub fn new(value: u32) -> Result<Self, ReplicaIndexError> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(ReplicaIndexError::Zero)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The index that follows this one, for scale-up planning.
    pub fn next(self) -> Self {
        Self(NonZeroU32::new(self.0.get() + 1).expect("u32 + 1 from a non-zero value stays positive"))
    }
}

impl fmt::Display for ReplicaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for ReplicaIndex {
    type Error = ReplicaIndexError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(matches!(ReplicaIndex::new(0), Err(ReplicaIndexError::Zero)));
    }

    #[test]
    fn first_is_one() {
        assert_eq!(ReplicaIndex::FIRST.get(), 1);
    }

    #[test]
    fn next_increments() {
        assert_eq!(ReplicaIndex::FIRST.next().get(), 2);
    }

    #[test]
    fn orders_numerically() {
        let a = ReplicaIndex::new(2).unwrap();
        let b = ReplicaIndex::new(10).unwrap();
        assert!(a < b);
    }
}
