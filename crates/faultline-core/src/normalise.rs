//! Normalisation functions for error fingerprinting.
//!
//! These functions strip variable data (numeric ids, UUIDs, timestamps,
//! memory addresses, network addresses) from error messages and stack
//! locations so that occurrences of the same underlying error hash to the
//! same fingerprint.

use std::sync::LazyLock;

use regex::Regex;

/// Compiled regex patterns for normalisation.
struct NormalisationPatterns {
    /// Matches line numbers in file paths: `file.rs:123` or `file.rs:123:45`
    line_numbers: Regex,
    /// Matches memory addresses: `0x7fff5fbfe000`
    memory_addresses: Regex,
    /// Matches UUIDs: `550e8400-e29b-41d4-a716-446655440000`
    uuids: Regex,
    /// Matches ISO 8601 timestamps: `2024-01-15T10:30:00Z`
    timestamps: Regex,
    /// Matches numeric IDs in common patterns: `id=12345`, `#123`
    numeric_ids: Regex,
    /// Matches IPv4 addresses
    ipv4_addresses: Regex,
    /// Matches IPv6 addresses
    ipv6_addresses: Regex,
    /// Matches request IDs and correlation IDs
    request_ids: Regex,
}

fn build_patterns() -> Option<NormalisationPatterns> {
    Some(NormalisationPatterns {
        line_numbers: Regex::new(r":(\d+)(:\d+)?([\s\)\]>]|$)").ok()?,
        memory_addresses: Regex::new(r"0x[0-9a-fA-F]{4,16}").ok()?,
        uuids: Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .ok()?,
        timestamps: Regex::new(
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?",
        )
        .ok()?,
        numeric_ids: Regex::new(r"(?i)(id[=:_]?|#)\d+").ok()?,
        ipv4_addresses: Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").ok()?,
        ipv6_addresses: Regex::new(r"[0-9a-fA-F]{1,4}(:[0-9a-fA-F]{1,4}){7}").ok()?,
        request_ids: Regex::new(
            r"(?i)(request[_-]?id|correlation[_-]?id|trace[_-]?id|span[_-]?id)[=:]\s*[0-9a-fA-F]{16,64}",
        )
        .ok()?,
    })
}

static PATTERNS: LazyLock<Option<NormalisationPatterns>> = LazyLock::new(build_patterns);

/// Normalise an error message for fingerprinting.
///
/// Strips the variable data listed on [`NormalisationPatterns`] and
/// collapses whitespace, so that messages differing only in embedded ids or
/// timestamps normalise to the same string.
#[must_use]
pub fn normalise_message(message: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return message.to_owned();
    };

    let mut result = message.to_owned();

    result = patterns.uuids.replace_all(&result, "<UUID>").to_string();
    result = patterns
        .timestamps
        .replace_all(&result, "<TIMESTAMP>")
        .to_string();
    result = patterns
        .memory_addresses
        .replace_all(&result, "0xADDR")
        .to_string();
    result = patterns
        .numeric_ids
        .replace_all(&result, "${1}<ID>")
        .to_string();
    result = patterns
        .ipv4_addresses
        .replace_all(&result, "<IPV4>")
        .to_string();
    result = patterns
        .ipv6_addresses
        .replace_all(&result, "<IPV6>")
        .to_string();
    result = patterns
        .request_ids
        .replace_all(&result, "${1}=<ID>")
        .to_string();

    normalise_whitespace(&result)
}

/// Normalise a stack location for fingerprinting.
///
/// A stack location (`src/handler.rs:120:17`, `com.example.Foo.bar`) keeps
/// its file and symbol but loses line/column numbers and addresses, which
/// shift between builds of the same code.
#[must_use]
pub fn normalise_stack_location(location: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return location.to_owned();
    };

    let mut result = location.to_owned();

    result = patterns.line_numbers.replace_all(&result, "$3").to_string();
    result = patterns
        .memory_addresses
        .replace_all(&result, "0xADDR")
        .to_string();

    normalise_whitespace(&result)
}

/// Collapse runs of whitespace into single spaces.
fn normalise_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_whitespace = false;

    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_whitespace {
                result.push(' ');
            }
            prev_whitespace = true;
        } else {
            result.push(c);
            prev_whitespace = false;
        }
    }

    result.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_uuids() {
        let result = normalise_message("request 550e8400-e29b-41d4-a716-446655440000 failed");
        assert!(result.contains("<UUID>"));
        assert!(!result.contains("550e8400"));
    }

    #[test]
    fn strips_timestamps() {
        let result = normalise_message("error at 2024-01-15T10:30:00Z: connection timeout");
        assert!(result.contains("<TIMESTAMP>"));
        assert!(!result.contains("2024-01-15"));
    }

    #[test]
    fn strips_numeric_ids() {
        let result = normalise_message("user id=12345 not found");
        assert!(result.contains("<ID>"));
        assert!(!result.contains("12345"));
    }

    #[test]
    fn strips_memory_addresses() {
        let result = normalise_message("segfault at 0x7fff5fbfe000");
        assert!(result.contains("0xADDR"));
        assert!(!result.contains("7fff5fbfe000"));
    }

    #[test]
    fn strips_ip_addresses() {
        let result = normalise_message("connection to 192.168.1.100 refused");
        assert!(result.contains("<IPV4>"));
        assert!(!result.contains("192.168.1.100"));
    }

    #[test]
    fn strips_request_ids() {
        let result = normalise_message("request_id=abc123def456789012345678 failed");
        assert!(result.contains("<ID>"));
        assert!(!result.contains("abc123def456789012345678"));
    }

    #[test]
    fn same_error_different_ids_same_result() {
        let msg1 = "user id=12345 not found at 2024-01-15T10:30:00Z";
        let msg2 = "user id=67890 not found at 2024-02-20T15:45:00Z";
        assert_eq!(normalise_message(msg1), normalise_message(msg2));
    }

    #[test]
    fn stack_location_loses_line_numbers() {
        let loc1 = normalise_stack_location("src/handler.rs:120:17");
        let loc2 = normalise_stack_location("src/handler.rs:98:3");
        assert_eq!(loc1, loc2);
        assert!(loc1.contains("src/handler.rs"));
    }

    #[test]
    fn whitespace_collapsed() {
        let result = normalise_message("error   with   multiple\n\n\nspaces");
        assert_eq!(result, "error with multiple spaces");
    }
}
