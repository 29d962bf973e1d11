//! Rule matching
//!
//! Picks the rule that governs a status change. Matching is pure: the same
//! event and rule list always give the same answer.

use crate::config::{FallbackBehavior, Rule};
use crate::model::StatusChangeEvent;

/// Select the rule for a status change
///
/// Only enabled rules whose source status equals the new status (or is the
/// wildcard) and whose direction covers the event's role are considered.
/// The highest priority wins; among equal priorities the first listed rule
/// wins.
pub fn match_rule<'a>(event: &StatusChangeEvent, rules: &'a [Rule]) -> Option<&'a Rule> {
    let mut best: Option<&Rule> = None;

    for rule in rules.iter().filter(|r| {
        r.enabled && r.matches_status(&event.to_status) && r.direction.applies_to(event.role)
    }) {
        match best {
            Some(current) if rule.priority <= current.priority => {}
            _ => best = Some(rule),
        }
    }

    best
}

/// Report a change that no rule handles
pub fn log_unmatched(event: &StatusChangeEvent, fallback: FallbackBehavior) {
    match fallback {
        FallbackBehavior::Ignore => {
            tracing::debug!(change = %event, "No rule matched");
        }
        FallbackBehavior::Log => {
            tracing::info!(
                issue = %event.issue_key,
                role = %event.role,
                status = %event.to_status,
                "No rule matched status change"
            );
        }
    }
}
