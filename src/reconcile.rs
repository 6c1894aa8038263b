//! Deterministic formatting reconciliation between a source string and its
//! translation.
//!
//! Models are good at translating content and bad at preserving the surface
//! shape of a string: trailing punctuation, leading indentation, newline
//! conventions. Rather than burning a corrective round trip on these, the
//! final reply is repaired here with a fixed set of shape-preserving edits.
//! Translated content is never touched, only boundary whitespace and
//! punctuation.

/// Longest whitespace run that is mirrored from source to candidate.
const MAX_RUN: usize = 20;

/// Repair the candidate so its boundary formatting matches the source.
///
/// The edits are applied in a fixed order:
/// 1. trailing `.` / `!` parity, ignoring trailing whitespace on both sides
/// 2. trailing newline count rebalancing
/// 3. leading/trailing space runs and leading newline runs, longest first
///
/// The function is idempotent: reconciling an already-reconciled candidate
/// is a no-op.
pub fn reconcile(source: &str, candidate: &str) -> String {
    let mut dest = reconcile_punctuation(source, candidate);

    // Balance the count of trailing newlines in the candidate
    let source_trailing_newlines = source.len() - source.trim_end_matches('\n').len();
    let dest_trailing_newlines = dest.len() - dest.trim_end_matches('\n').len();
    if source_trailing_newlines != dest_trailing_newlines {
        dest.truncate(dest.trim_end_matches('\n').len());
        dest.push_str(&"\n".repeat(source_trailing_newlines));
    }

    // Longer runs first so a shorter suffix of an already-mirrored run is
    // never applied twice
    for idx in (2..=MAX_RUN).rev() {
        let spaces = " ".repeat(idx);
        let newlines = "\n".repeat(idx);

        if source.ends_with(&spaces) && !dest.ends_with(&spaces) {
            // Replace any shorter run so mirrored runs never stack
            dest.truncate(dest.trim_end_matches(' ').len());
            dest.push_str(&spaces);
        }
        if !source.ends_with(&spaces) && dest.ends_with(&spaces) {
            dest.truncate(dest.trim_end_matches(' ').len());
        }
        if source.starts_with(&spaces) && !dest.starts_with(&spaces) {
            dest.insert_str(0, &spaces);
        }
        if source.starts_with(&newlines) && !dest.starts_with(&newlines) {
            dest.insert_str(0, &newlines);
        }
    }

    dest
}

/// Mirror trailing `.` and `!` from source to candidate, comparing the
/// strings with trailing whitespace stripped so `"Hello.\n"` still counts
/// as period-terminated.
fn reconcile_punctuation(source: &str, candidate: &str) -> String {
    let source_core = source.trim_end_matches([' ', '\n']);
    let core_len = candidate.trim_end_matches([' ', '\n']).len();
    let (core, tail) = candidate.split_at(core_len);
    let mut core = core.to_string();

    if source_core.ends_with('.') && !core.ends_with('.') {
        core.push('.');
    } else if !source_core.ends_with('.') && core.ends_with('.') {
        core.truncate(core.trim_end_matches('.').len());
    }
    if source_core.ends_with('!') && !core.ends_with('!') {
        core.push('!');
    }

    core.push_str(tail);
    core
}
