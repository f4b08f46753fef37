//! Sequential, human-readable entity ids (`task-001`, `convoy-012`).

/// Format a sequence number with the given prefix, zero-padded to 3 digits.
pub fn format_sequence(prefix: &str, n: u64) -> String {
    format!("{prefix}-{n:03}")
}

/// Parse the numeric suffix of an id with the given prefix.
///
/// Returns `None` for ids that do not follow the `<prefix>-<digits>` shape.
pub fn parse_sequence(id: &str, prefix: &str) -> Option<u64> {
    id.strip_prefix(prefix)?
        .strip_prefix('-')
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))?
        .parse()
        .ok()
}
