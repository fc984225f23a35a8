//! Unified error interface for coupler.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so that the
//! dispatcher, the transport and the CLI can report failures uniformly,
//! whichever layer raised them.
//!
//! # Code Prefixes
//!
//! | Layer | Prefix |
//! |-------|--------|
//! | Capability registry | `CAPABILITY_` |
//! | Component contract | `COMPONENT_` |
//! | Configuration | `CONFIG_` |
//! | Dispatcher | `DISPATCH_` |
//! | Distributed transport | `TRANSPORT_` |
//!
//! # Example
//!
//! ```
//! use coupler_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LinkError {
//!     Refused,
//!     Malformed,
//! }
//!
//! impl ErrorCode for LinkError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Refused => "LINK_REFUSED",
//!             Self::Malformed => "LINK_MALFORMED",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Refused)
//!     }
//! }
//!
//! assert_eq!(LinkError::Refused.code(), "LINK_REFUSED");
//! assert!(!LinkError::Malformed.is_recoverable());
//! ```

/// Machine-readable error classification.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, prefixed by the layer (see module docs)
/// - **Stable**: codes appear in run summaries and must not change
///
/// # Recoverability
///
/// An error is recoverable when re-running the same configuration may
/// succeed (a peer that was not listening yet, a transient I/O failure).
/// Structural problems such as duplicate capability declarations are not.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows the workspace conventions.
///
/// # Panics
///
/// Panics with a descriptive message if the code is empty, lacks the
/// expected prefix, or is not UPPER_SNAKE_CASE.
///
/// # Example
///
/// ```
/// use coupler_types::{assert_error_code, ErrorCode};
///
/// #[derive(Debug)]
/// enum MyError { Timeout }
///
/// impl ErrorCode for MyError {
///     fn code(&self) -> &'static str { "MY_TIMEOUT" }
///     fn is_recoverable(&self) -> bool { true }
/// }
///
/// assert_error_code(&MyError::Timeout, "MY_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }

    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum ProbeError {
        Lost,
        Corrupt,
    }

    impl ErrorCode for ProbeError {
        fn code(&self) -> &'static str {
            match self {
                Self::Lost => "PROBE_LOST",
                Self::Corrupt => "PROBE_CORRUPT",
            }
        }

        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Lost)
        }
    }

    #[test]
    fn codes_and_recoverability() {
        assert_eq!(ProbeError::Lost.code(), "PROBE_LOST");
        assert!(ProbeError::Lost.is_recoverable());
        assert!(!ProbeError::Corrupt.is_recoverable());
    }

    #[test]
    fn valid_codes_pass() {
        assert_error_codes(&[ProbeError::Lost, ProbeError::Corrupt], "PROBE_");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn wrong_prefix_panics() {
        assert_error_code(&ProbeError::Lost, "OTHER_");
    }

    #[test]
    fn snake_case_rules() {
        assert!(is_upper_snake_case("CAPABILITY_NOT_FOUND"));
        assert!(is_upper_snake_case("TRANSPORT_IO2"));
        assert!(!is_upper_snake_case("capability_not_found"));
        assert!(!is_upper_snake_case("_LEADING"));
        assert!(!is_upper_snake_case("TRAILING_"));
        assert!(!is_upper_snake_case("DOUBLE__UNDERSCORE"));
        assert!(!is_upper_snake_case(""));
    }
}
