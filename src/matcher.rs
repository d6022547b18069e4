//! Prompt recognition over the unconsumed session output
//!
//! Matching is pure: the same buffer and candidate set always give the same
//! answer. Candidates are tried in the order given and the first one that
//! matches anywhere in the buffer wins, so callers list error and structural
//! prompts ahead of generic ones.

use regex::bytes::Regex;
use std::ops::Range;

/// Recognition pattern of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Verbatim text
    Literal(&'static str),
    /// Regular expression over the raw bytes
    Regex(&'static str),
}

impl Pattern {
    /// Compile into a byte regex
    pub fn compile(&self) -> Result<Regex, regex::Error> {
        match self {
            Pattern::Literal(text) => Regex::new(&regex::escape(text)),
            Pattern::Regex(source) => Regex::new(source),
        }
    }
}

/// A recognized prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the matching rule, as supplied by the caller
    pub rule: usize,
    /// Byte range of the matched text within the buffer
    pub span: Range<usize>,
}

/// Find the first candidate that matches the buffer
///
/// `candidates` yields `(rule index, compiled pattern)` pairs in priority order.
pub fn find_match<'r, I>(buffer: &[u8], candidates: I) -> Option<Match>
where
    I: IntoIterator<Item = (usize, &'r Regex)>,
{
    candidates.into_iter().find_map(|(rule, regex)| {
        regex.find(buffer).map(|m| Match {
            rule,
            span: m.range(),
        })
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(patterns: &[Pattern]) -> Vec<Regex> {
        patterns.iter().map(|p| p.compile().unwrap()).collect()
    }

    #[test]
    fn no_candidate_matches_incomplete_output() {
        let regexes = compiled(&[Pattern::Literal("Horizons>")]);
        let found = find_match(b"Welcome to Horiz", regexes.iter().enumerate());
        assert_eq!(found, None);
    }

    #[test]
    fn earlier_candidate_wins_even_if_it_matches_later_text() {
        let regexes = compiled(&[
            Pattern::Literal("No matches found"),
            Pattern::Regex(r"Continue \[[^\]]*\]"),
        ]);
        let buffer = b"Continue [ <cr>=yes ] ... No matches found";
        let found = find_match(buffer, regexes.iter().enumerate()).unwrap();
        assert_eq!(found.rule, 0);
        assert_eq!(&buffer[found.span], b"No matches found");
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let regexes = compiled(&[Pattern::Literal("[S]PK")]);
        let found = find_match(b"[E]phemeris, [S]PK, ?", regexes.iter().enumerate()).unwrap();
        assert_eq!(found.span, 13..18);
        assert_eq!(find_match(b"SPK", regexes.iter().enumerate()), None);
    }

    #[test]
    fn caller_indices_are_preserved() {
        let regexes = compiled(&[Pattern::Literal("a"), Pattern::Literal("b")]);
        let candidates = vec![(7, &regexes[0]), (3, &regexes[1])];
        let found = find_match(b"b", candidates).unwrap();
        assert_eq!(found, Match { rule: 3, span: 0..1 });
    }

    #[test]
    fn matching_is_deterministic() {
        let regexes = compiled(&[
            Pattern::Regex(r"SPK object (START|STOP)"),
            Pattern::Literal("Add more objects"),
        ]);
        let buffer = b"Enter SPK object STOP [yyyy-mm-dd] : ";
        let first = find_match(buffer, regexes.iter().enumerate());
        for _ in 0..10 {
            assert_eq!(find_match(buffer, regexes.iter().enumerate()), first);
        }
    }

    #[test]
    fn binary_bytes_do_not_break_matching() {
        let regexes = compiled(&[Pattern::Regex(r"SPK binary transfer: (\d+) bytes\r?\n")]);
        let mut buffer = vec![0xff, 0x00, 0xfe];
        buffer.extend_from_slice(b"SPK binary transfer: 12 bytes\r\n");
        buffer.extend_from_slice(&[0xde, 0xad]);
        let found = find_match(&buffer, regexes.iter().enumerate()).unwrap();
        assert_eq!(found.span.start, 3);
        assert_eq!(found.span.end, buffer.len() - 2);
    }
}
