//! Extracting facts from the service output preceding a prompt

use crate::rules::CompiledTable;

/// SPK object ID announced before the e-mail prompt
pub(crate) fn object_id(table: &CompiledTable, before: &[u8]) -> Option<String> {
    table
        .object_id
        .captures(before)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Body name from the record banner, if the output contains one
pub(crate) fn target_name(table: &CompiledTable, before: &[u8]) -> Option<String> {
    table
        .banner
        .captures_iter(before)
        .filter_map(|caps| caps.get(1))
        .last()
        .map(|m| display_name(&String::from_utf8_lossy(m.as_bytes())))
        .filter(|name| !name.is_empty())
}

/// Reduce a banner designation to the name used in file names
///
/// `433 Eros (A898 PA)` gives `Eros`, `(2000 SG344)` gives `2000 SG344`,
/// `99942 (2004 MN4)` gives `2004 MN4`.
pub(crate) fn display_name(banner: &str) -> String {
    let text = banner.trim();

    let (head, designation) = match text.rfind('(') {
        Some(open) if text.ends_with(')') => (
            text[..open].trim(),
            Some(text[open + 1..text.len() - 1].trim()),
        ),
        _ => (text, None),
    };

    let name = match head.split_once(char::is_whitespace) {
        Some((number, rest)) if number.chars().all(|c| c.is_ascii_digit()) => rest.trim(),
        _ if head.chars().all(|c| c.is_ascii_digit()) => "",
        _ => head,
    };

    match (name.is_empty(), designation) {
        (true, Some(designation)) => designation.to_string(),
        (true, None) => head.to_string(),
        (false, _) => name.to_string(),
    }
}
