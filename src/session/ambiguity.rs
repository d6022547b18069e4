//! Resolving ambiguous small-body searches
//!
//! When an identifier matches several bodies, Horizons prints a table of
//! candidates and asks for a record number. The resolver picks the exact match
//! (or the caller's explicit selection) and gives up after a few lists so a
//! search that keeps branching cannot loop forever.

use crate::types::Candidate;

/// Candidate lists accepted in one negotiation
pub(crate) const MAX_CANDIDATE_LISTS: u32 = 3;

/// Why no candidate could be chosen
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Unresolved {
    /// No exact match, several exact matches, or too many lists
    Ambiguous(Vec<Candidate>),
    /// The list could not be parsed
    Unreadable,
}

/// Per-negotiation resolver state
#[derive(Debug)]
pub(crate) struct AmbiguityResolver {
    requested: String,
    selection: Option<String>,
    lists_seen: u32,
}

impl AmbiguityResolver {
    pub(crate) fn new(requested: &str, selection: Option<&str>) -> Self {
        Self {
            requested: requested.to_string(),
            selection: selection.map(str::to_string),
            lists_seen: 0,
        }
    }

    /// Pick a record from the candidate list printed in `text`
    pub(crate) fn resolve(&mut self, text: &str) -> Result<Candidate, Unresolved> {
        let candidates = parse_candidates(text);
        if candidates.is_empty() {
            return Err(Unresolved::Unreadable);
        }

        self.lists_seen += 1;
        if self.lists_seen > MAX_CANDIDATE_LISTS {
            return Err(Unresolved::Ambiguous(candidates));
        }

        match choose_candidate(&candidates, &self.requested, self.selection.as_deref()) {
            Some(chosen) => Ok(chosen.clone()),
            None => Err(Unresolved::Ambiguous(candidates)),
        }
    }
}

/// Parse the rows of a small-body search result table
///
/// Rows follow the dashed separator line; the first column is the record
/// number the service accepts as a selection.
fn parse_candidates(text: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut in_table = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !in_table {
            in_table = trimmed.starts_with("---");
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('(') {
            if candidates.is_empty() {
                continue;
            }
            break;
        }

        let (record, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        if record.parse::<i64>().is_err() {
            if candidates.is_empty() {
                continue;
            }
            break;
        }
        candidates.push(Candidate {
            record: record.to_string(),
            description: rest.trim().to_string(),
        });
    }

    candidates
}

/// Pick the candidate to resubmit
///
/// An explicit `selection` must name one of the listed records. Otherwise
/// exactly one candidate must match `requested` by record number or by one
/// of its columns (case-insensitive); anything else is ambiguous.
fn choose_candidate<'a>(
    candidates: &'a [Candidate],
    requested: &str,
    selection: Option<&str>,
) -> Option<&'a Candidate> {
    if let Some(selection) = selection {
        let selection = selection.trim().trim_end_matches(';');
        return candidates.iter().find(|c| c.record == selection);
    }

    let wanted = requested.trim();
    let mut exact = candidates.iter().filter(|c| {
        c.record == wanted
            || c
                .description
                .split("  ")
                .map(str::trim)
                .any(|column| !column.is_empty() && column.eq_ignore_ascii_case(wanted))
    });

    match (exact.next(), exact.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
