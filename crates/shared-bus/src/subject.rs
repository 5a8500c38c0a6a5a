//! # Subjects
//!
//! Routing keys are dot-separated tokens such as `hal.v1.command` or
//! `device.esp32-001.telemetry`. Subscription patterns may use two
//! wildcards:
//!
//! - `*` matches exactly one token (`device.*.telemetry`)
//! - `>` matches one or more trailing tokens (`hal.v1.>`)
//!
//! Collaborators publish events on `<entity>.<id>.<event>` and accept
//! commands on `<node>.<id>.<command-type>`.

use crate::error::TransportError;

/// Single-token wildcard.
pub const SINGLE_WILDCARD: &str = "*";

/// Tail wildcard; only valid as the last token.
pub const TAIL_WILDCARD: &str = ">";

/// Subject for a collaborator event: `<entity>.<id>.<event>`.
#[must_use]
pub fn event_subject(entity: &str, id: &str, event: &str) -> String {
    format!("{entity}.{id}.{event}")
}

/// Subject for a collaborator command: `<node>.<id>.<command-type>`.
#[must_use]
pub fn command_subject(node: &str, id: &str, command: &str) -> String {
    format!("{node}.{id}.{command}")
}

/// Validate a concrete publish subject (no wildcards).
pub fn validate_subject(subject: &str) -> Result<(), TransportError> {
    check_tokens(subject)?;
    if subject
        .split('.')
        .any(|t| t == SINGLE_WILDCARD || t == TAIL_WILDCARD)
    {
        return Err(invalid(subject, "wildcards are not allowed when publishing"));
    }
    Ok(())
}

/// Validate a subscription pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), TransportError> {
    check_tokens(pattern)?;
    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;
    if tokens
        .iter()
        .enumerate()
        .any(|(i, t)| *t == TAIL_WILDCARD && i != last)
    {
        return Err(invalid(pattern, "'>' must be the last token"));
    }
    Ok(())
}

/// Whether `subject` is matched by `pattern`.
///
/// Both are assumed valid; malformed input simply does not match.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) => return pattern_tokens.next().is_none(),
            (Some(SINGLE_WILDCARD), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn check_tokens(subject: &str) -> Result<(), TransportError> {
    if subject.is_empty() {
        return Err(invalid(subject, "must not be empty"));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(invalid(subject, "tokens must not be empty"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(invalid(subject, "must not contain whitespace"));
    }
    Ok(())
}

fn invalid(subject: &str, reason: &str) -> TransportError {
    TransportError::InvalidSubject {
        subject: subject.to_string(),
        reason: reason.to_string(),
    }
}
