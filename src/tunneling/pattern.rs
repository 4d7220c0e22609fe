//! Host pattern matching shared by `~/.ssh/config` and `known_hosts`.
//!
//! Patterns support `*` (any run of characters), `?` (exactly one character)
//! and a leading `!` for negation. Matching is ASCII case-insensitive.

/// Returns true when `host` matches at least one positive pattern and no
/// negated pattern.
pub(crate) fn matches_any<'a>(host: &str, patterns: impl IntoIterator<Item = &'a str>) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(host, negated) {
                return false;
            }
        } else if wildcard_match(host, pattern) {
            matched = true;
        }
    }
    matched
}

/// Glob match with single-star backtracking.
pub(crate) fn wildcard_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p].eq_ignore_ascii_case(&text[t])) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // let the last star swallow one more character
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}
