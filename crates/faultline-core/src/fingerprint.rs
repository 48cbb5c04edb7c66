//! Error fingerprinting for deduplication.
//!
//! The fingerprint is a SHA-256 hash computed from normalised components of
//! an error occurrence, so that the same logical error on the same component
//! always yields the same fingerprint while genuinely distinct errors
//! essentially never collide. Stable across process restarts: no process
//! state enters the hash.

use sha2::{Digest, Sha256};

use crate::normalise::{normalise_message, normalise_stack_location};

/// Configuration for fingerprint computation.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Include the component name in the fingerprint.
    pub include_component: bool,
    /// Include the normalised error message in the fingerprint.
    pub include_message: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            include_component: true,
            include_message: true,
        }
    }
}

/// Computes fingerprints that identify a class of error occurrence.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    /// Create a fingerprinter with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fingerprinter with custom configuration.
    #[must_use]
    pub const fn with_config(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Compute the fingerprint for an error occurrence.
    ///
    /// The hash covers, in order: error type, component (if configured),
    /// normalised message (if configured), and normalised stack location,
    /// each separated by a NUL delimiter so that component boundaries cannot
    /// be confused.
    ///
    /// Returns the SHA-256 digest as a hex string.
    #[must_use]
    pub fn compute(
        &self,
        error_type: &str,
        component: &str,
        message: &str,
        stack_location: Option<&str>,
    ) -> String {
        const DELIMITER: &[u8] = b"\x00";

        let mut hasher = Sha256::new();

        hasher.update(error_type.as_bytes());
        hasher.update(DELIMITER);

        if self.config.include_component {
            hasher.update(component.as_bytes());
        }
        hasher.update(DELIMITER);

        if self.config.include_message {
            let normalised = normalise_message(message);
            hasher.update(normalised.as_bytes());
        }
        hasher.update(DELIMITER);

        if let Some(location) = stack_location {
            let normalised = normalise_stack_location(location);
            hasher.update(normalised.as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

/// Convenience function computing a fingerprint with default settings.
#[must_use]
pub fn compute_fingerprint(
    error_type: &str,
    component: &str,
    message: &str,
    stack_location: Option<&str>,
) -> String {
    Fingerprinter::new().compute(error_type, component, message, stack_location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_error_same_fingerprint() {
        let fp = Fingerprinter::new();

        let f1 = fp.compute(
            "TimeoutError",
            "svc-a",
            "request id=1234 timed out",
            Some("src/client.rs:88"),
        );
        let f2 = fp.compute(
            "TimeoutError",
            "svc-a",
            "request id=9876 timed out",
            Some("src/client.rs:88"),
        );

        assert_eq!(f1, f2);
    }

    #[test]
    fn timestamps_normalised_away() {
        let fp = Fingerprinter::new();

        let f1 = fp.compute(
            "JobFailed",
            "worker",
            "job failed at 2024-01-15T10:30:00Z",
            None,
        );
        let f2 = fp.compute(
            "JobFailed",
            "worker",
            "job failed at 2024-06-02T08:12:45Z",
            None,
        );

        assert_eq!(f1, f2);
    }

    #[test]
    fn different_components_different_fingerprint() {
        let fp = Fingerprinter::new();

        let f1 = fp.compute("TimeoutError", "svc-a", "connection timed out", None);
        let f2 = fp.compute("TimeoutError", "svc-b", "connection timed out", None);

        assert_ne!(f1, f2);
    }

    #[test]
    fn different_error_types_different_fingerprint() {
        let fp = Fingerprinter::new();

        let f1 = fp.compute("TimeoutError", "svc-a", "boom", None);
        let f2 = fp.compute("ConnectionError", "svc-a", "boom", None);

        assert_ne!(f1, f2);
    }

    #[test]
    fn stack_location_line_numbers_ignored() {
        let fp = Fingerprinter::new();

        let f1 = fp.compute("Panic", "svc-a", "index out of bounds", Some("src/lib.rs:42"));
        let f2 = fp.compute("Panic", "svc-a", "index out of bounds", Some("src/lib.rs:57"));

        assert_eq!(f1, f2);
    }

    #[test]
    fn fingerprint_is_valid_hex() {
        let result = compute_fingerprint("Error", "svc", "message", None);
        assert_eq!(result.len(), 64);
        assert!(result.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_components_handled() {
        let result = compute_fingerprint("", "", "", None);
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn config_without_message() {
        let config = FingerprintConfig {
            include_message: false,
            ..Default::default()
        };
        let fp = Fingerprinter::with_config(config);

        let f1 = fp.compute("Error", "svc", "message A", None);
        let f2 = fp.compute("Error", "svc", "message B", None);

        assert_eq!(f1, f2);
    }
}
