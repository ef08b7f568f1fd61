//! Error types for the rankkit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when construction parameters are invalid
//!   (e.g. a TTL below the supported minimum, accuracy not below the TTL).
//! - [`InvariantError`]: Returned by `check_invariants` methods when an
//!   internal data-structure invariant is violated.
//!
//! Misuse of handles (structural operations on absent items, accessors on
//! null handles, double deletes) is a programming error and panics instead
//! of surfacing through these types.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use rankkit::error::ConfigError;
//! use rankkit::ttl::TtlMap;
//!
//! // Fallible constructor for user-configurable parameters
//! let ok: Result<_, ConfigError> =
//!     TtlMap::<u64, String>::try_new(Duration::from_secs(1), Duration::from_millis(100));
//! assert!(ok.is_ok());
//!
//! // Accuracy at or above the TTL is caught without panicking
//! let bad = TtlMap::<u64, String>::try_new(Duration::from_secs(1), Duration::from_secs(1));
//! assert!(bad.is_err());
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when construction parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`TtlMap::try_new`](crate::ttl::TtlMap::try_new). The panicking
/// constructor variants forward this error's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal data-structure invariants are violated.
///
/// Produced by `check_invariants` methods on the ranked containers
/// (e.g. [`RankedList::check_invariants`](crate::ds::RankedList::check_invariants)).
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ConfigError --------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("accuracy must be below ttl");
        assert_eq!(err.to_string(), "accuracy must be below ttl");
    }

    #[test]
    fn config_message_accessor() {
        let err = ConfigError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn config_clone_and_eq() {
        let a = ConfigError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- InvariantError -----------------------------------------------------

    #[test]
    fn invariant_display_shows_message() {
        let err = InvariantError::new("heap position mismatch");
        assert_eq!(err.to_string(), "heap position mismatch");
    }

    #[test]
    fn invariant_debug_includes_message() {
        let err = InvariantError::new("bad index");
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("bad index"));
    }

    #[test]
    fn invariant_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<InvariantError>();
    }
}
