//! Automated quality checks run against every textual model reply.
//!
//! Each check is an independent pure predicate paired with a [`Directive`].
//! The battery is evaluated in a fixed priority order and the first failing
//! directive that has not already been applied this attempt is returned.
//! Because a directive fires at most once per attempt, the corrective loop
//! in the engine is bounded by the number of directive kinds.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Candidate may exceed the source by at most this many characters before
/// the length check fires. Historical policies disagreed on this value
/// (none vs 40 vs 500); 40 is the strictest variant.
const MAX_LENGTH_EXCESS: usize = 40;

/// A corrective instruction injected into the conversation after a failed
/// check. Each variant is bound to one static, pre-authored prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    PlaceholderMismatch,
    LengthMismatch,
    BacktickMismatch,
}

impl Directive {
    /// The corrective prompt appended to the conversation when this
    /// directive fires.
    pub fn prompt(&self) -> &'static str {
        match self {
            Directive::PlaceholderMismatch => {
                "Your translation does not contain the same amount of {placeholders} as the \
                 source text. Revise your translation so that every placeholder from the source \
                 appears exactly once, unmodified, and return only the updated translation."
            }
            Directive::LengthMismatch => {
                "Your translation is much longer than the source text. Translations should stay \
                 close to the source in length. Revise your translation to be more concise and \
                 return only the updated translation."
            }
            Directive::BacktickMismatch => {
                "Your translation does not contain the same amount of backtick (`) characters \
                 as the source text. Text delimited by backticks must be preserved verbatim. \
                 Revise your translation and return only the updated translation."
            }
        }
    }
}

/// The ordered battery. New checks are added here, not by forking the
/// engine's control loop.
const CHECKS: &[(Directive, fn(&str, &str) -> bool)] = &[
    (Directive::PlaceholderMismatch, placeholder_count_differs),
    (Directive::LengthMismatch, length_excess_too_large),
    (Directive::BacktickMismatch, backtick_count_differs),
];

/// Run the battery against a candidate translation.
///
/// Returns the first failing directive not present in `already_applied`,
/// or `None` when the candidate passes (or only re-fails checks that have
/// already been corrected once this attempt).
pub fn check(
    source: &str,
    candidate: &str,
    already_applied: &HashSet<Directive>,
) -> Option<Directive> {
    CHECKS
        .iter()
        .find(|(directive, failed)| !already_applied.contains(directive) && failed(source, candidate))
        .map(|(directive, _)| *directive)
}

/// Count of brace-delimited placeholder tokens, matched non-greedily so
/// `{a} {b}` counts as two tokens rather than one.
pub fn count_placeholders(text: &str) -> usize {
    let regex = PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\{.*?\}").unwrap());
    regex.find_iter(text).count()
}

fn placeholder_count_differs(source: &str, candidate: &str) -> bool {
    count_placeholders(source) != count_placeholders(candidate)
}

fn length_excess_too_large(source: &str, candidate: &str) -> bool {
    let source_len = source.chars().count();
    let candidate_len = candidate.chars().count();
    candidate_len > source_len + MAX_LENGTH_EXCESS
}

fn backtick_count_differs(source: &str, candidate: &str) -> bool {
    let backticks = |text: &str| text.chars().filter(|&c| c == '`').count();
    backticks(source) != backticks(candidate)
}
