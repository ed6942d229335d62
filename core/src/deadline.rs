//! Operation deadlines
//!
//! Every device operation is bounded by a [`Deadline`]. Wire reads and writes
//! block up to the time remaining; running out is a fatal [`DeviceError::Timeout`].

use std::time::{Duration, Instant};

use crate::error::DeviceError;

/// Request deadline used when the caller does not supply one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest timeout [`Deadline::after`] honors; larger ones are clamped
pub const MAX_TIMEOUT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A point in time by which an operation must complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now, clamped to [`MAX_TIMEOUT`]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout.min(MAX_TIMEOUT))
    }

    /// Deadline at a fixed instant
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left, or `None` once expired
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Time left, or a timeout error naming `what` was being waited for
    pub fn check(&self, what: &str) -> Result<Duration, DeviceError> {
        self.remaining()
            .ok_or_else(|| DeviceError::Timeout(what.to_string()))
    }

    /// The earlier of two deadlines
    pub fn min(self, other: Deadline) -> Self {
        if other.0 < self.0 { other } else { self }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::after(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_remaining() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let remaining = deadline.remaining().unwrap();
        assert!(remaining > Duration::from_secs(9));
        assert!(!deadline.is_expired());
    }

    #[test]
    fn test_expired_deadline_is_fatal_timeout() {
        let deadline = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(deadline.is_expired());

        let err = deadline.check("vget response").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("vget response"));
    }

    #[test]
    fn test_huge_timeout_is_clamped() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().unwrap() <= MAX_TIMEOUT);

        let from_config = Deadline::after(Duration::from_millis(u64::MAX));
        assert!(from_config.remaining().unwrap() > Duration::from_secs(3600));
    }

    #[test]
    fn test_deadline_min() {
        let near = Deadline::after(Duration::from_millis(10));
        let far = Deadline::after(Duration::from_secs(10));
        assert_eq!(near.min(far), near);
        assert_eq!(far.min(near), near);
    }
}
