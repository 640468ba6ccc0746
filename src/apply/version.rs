//! Loose version handling: enough to tell a major jump, not a range solver.

/// Strips range operators from a manifest spec: `^1.2.3` → `1.2.3`,
/// `>=2.0,<3` → `2.0`, `~=1.4` → `1.4`. Alternatives (`||`) keep the first arm.
pub fn strip_range(spec: &str) -> String {
    let first = spec
        .split("||")
        .next()
        .unwrap_or(spec)
        .split(',')
        .next()
        .unwrap_or(spec)
        .trim();
    first
        .trim_start_matches(|c: char| matches!(c, '^' | '~' | '>' | '<' | '=' | '!'))
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// Leading numeric component, ignoring a `v` prefix and range operators.
pub fn leading_number(version: &str) -> Option<u64> {
    let bare = strip_range(version);
    let bare = bare.strip_prefix('v').unwrap_or(&bare);
    let digits: String = bare.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `true` when the leading numbers differ. A side without a leading number
/// (unpinned `*`, a branch name) cannot be shown to stay within one major and
/// counts as a major change.
pub fn is_major(current: &str, target: &str) -> bool {
    match (leading_number(current), leading_number(target)) {
        (Some(from), Some(to)) => from != to,
        _ => true,
    }
}

/// Range prefix of a manifest spec (`^`, `~`, or empty), reused when rewriting it.
pub fn range_prefix(spec: &str) -> &'static str {
    match spec.trim_start().chars().next() {
        Some('^') => "^",
        Some('~') => "~",
        _ => "",
    }
}
