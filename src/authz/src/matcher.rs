//! Permission pattern matching
//!
//! Operations and resources are colon-separated strings compared segment by
//! segment:
//! - `*` matches any single segment
//! - for resources, a trailing `*` also matches the rest of the candidate
//! - inside a resource segment, `org.7.*` matches any deeper dotted id
//!   (`org.7.team.3`)
//!
//! Matching assumes well-formed patterns. Patterns are checked with
//! [`validate_operation_pattern`] and [`validate_resource_pattern`] when a
//! role's permissions are written.
//!
//! # Examples
//!
//! ```
//! use tenant_authz::matcher::{match_operation, match_resource};
//!
//! assert!(match_operation("self:*:*", "self:profile:get"));
//! assert!(!match_operation("self:*:*", "sys:users:list"));
//! assert!(match_resource("*", "org.7.team.3:*:*"));
//! assert!(match_resource("org.7.*:*", "org.7.team.3:*:*"));
//! ```

use crate::error::{AuthzError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Segment delimiter for operations and resources
pub const SEGMENT_DELIMITER: char = ':';

/// Delimiter between nested ids inside a resource segment
pub const NESTED_DELIMITER: char = '.';

/// Wildcard token
pub const WILDCARD: &str = "*";

const OPERATION_SEGMENTS: usize = 3;

fn literal_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid literal regex"))
}

fn resource_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@?[A-Za-z0-9_\-]+$").expect("valid component regex"))
}

/// Checks whether an operation pattern matches a concrete operation
///
/// Both sides must have the same number of segments; a `*` pattern segment
/// matches any candidate segment.
pub fn match_operation(pattern: &str, candidate: &str) -> bool {
    let mut pattern_segments = pattern.split(SEGMENT_DELIMITER);
    let mut candidate_segments = candidate.split(SEGMENT_DELIMITER);

    loop {
        match (pattern_segments.next(), candidate_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(c)) => {
                if p != WILDCARD && p != c {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Checks whether a resource pattern matches a resource candidate
///
/// A trailing `*` segment consumes every remaining candidate segment,
/// including none.
pub fn match_resource(pattern: &str, candidate: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split(SEGMENT_DELIMITER).collect();
    let candidate_segments: Vec<&str> = candidate.split(SEGMENT_DELIMITER).collect();
    let last = pattern_segments.len() - 1;

    for (idx, p) in pattern_segments.iter().enumerate() {
        if idx == last && *p == WILDCARD {
            return true;
        }

        match candidate_segments.get(idx) {
            Some(c) if segment_matches(p, c) => continue,
            _ => return false,
        }
    }

    pattern_segments.len() == candidate_segments.len()
}

/// Matches one resource segment, honoring a trailing `.*` nested wildcard
fn segment_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(WILDCARD) {
        if prefix.ends_with(NESTED_DELIMITER) {
            return candidate.len() > prefix.len() && candidate.starts_with(prefix);
        }
    }

    pattern == candidate
}

/// Validates an operation pattern before it is stored
///
/// Requires exactly three segments, each either `*` or a literal made of
/// letters, digits, `_` and `-`.
pub fn validate_operation_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(AuthzError::InvalidPattern(
            "operation pattern cannot be empty".to_string(),
        ));
    }

    let segments: Vec<&str> = pattern.split(SEGMENT_DELIMITER).collect();
    if segments.len() != OPERATION_SEGMENTS {
        return Err(AuthzError::InvalidPattern(format!(
            "operation pattern '{}' must have {} segments, found {}",
            pattern,
            OPERATION_SEGMENTS,
            segments.len()
        )));
    }

    for segment in segments {
        if segment == WILDCARD {
            continue;
        }
        if segment.is_empty() {
            return Err(AuthzError::InvalidPattern(format!(
                "operation pattern '{}' has an empty segment",
                pattern
            )));
        }
        if segment.contains('*') {
            return Err(AuthzError::InvalidPattern(format!(
                "wildcards must be standalone segments: '{}'",
                segment
            )));
        }
        if !literal_segment().is_match(segment) {
            return Err(AuthzError::InvalidPattern(format!(
                "invalid characters in operation segment '{}'",
                segment
            )));
        }
    }

    Ok(())
}

/// Validates a resource pattern before it is stored
///
/// Accepts exactly three segments, or fewer when the last one is `*`; a
/// shorter pattern without a trailing wildcard could never match a resource
/// candidate. A segment is `*` or a dotted id whose components are literals
/// or `@variables`; only the final component of a segment may be the nested
/// wildcard `*`.
pub fn validate_resource_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(AuthzError::InvalidPattern(
            "resource pattern cannot be empty".to_string(),
        ));
    }

    let segments: Vec<&str> = pattern.split(SEGMENT_DELIMITER).collect();
    if segments.len() > OPERATION_SEGMENTS {
        return Err(AuthzError::InvalidPattern(format!(
            "resource pattern '{}' has more than {} segments",
            pattern, OPERATION_SEGMENTS
        )));
    }
    if segments.len() < OPERATION_SEGMENTS && segments.last() != Some(&WILDCARD) {
        return Err(AuthzError::InvalidPattern(format!(
            "resource pattern '{}' must have {} segments or end with ':*'",
            pattern, OPERATION_SEGMENTS
        )));
    }

    for segment in segments {
        if segment == WILDCARD {
            continue;
        }
        if segment.is_empty() {
            return Err(AuthzError::InvalidPattern(format!(
                "resource pattern '{}' has an empty segment",
                pattern
            )));
        }

        let components: Vec<&str> = segment.split(NESTED_DELIMITER).collect();
        let last = components.len() - 1;
        for (idx, component) in components.iter().enumerate() {
            if *component == WILDCARD && idx == last && idx > 0 {
                continue;
            }
            if component.contains('*') {
                return Err(AuthzError::InvalidPattern(format!(
                    "nested wildcard must terminate the segment: '{}'",
                    segment
                )));
            }
            if !resource_component().is_match(component) {
                return Err(AuthzError::InvalidPattern(format!(
                    "invalid resource component '{}' in '{}'",
                    component, pattern
                )));
            }
        }
    }

    Ok(())
}
