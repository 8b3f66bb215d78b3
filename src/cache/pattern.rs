//! Redis-style glob matching for cache keys.
//!
//! Follows the `KEYS`/`SCAN MATCH` syntax so the in-process cache selects
//! the same keys a Redis server would:
//!
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` and `[^a]` match one character from (or outside) a set
//! - `\` makes the next character literal, inside or outside a set
//!
//! Everything else matches itself.

/// Check whether `key` matches the glob `pattern`.
pub fn matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Position after the last `*` seen, and the key position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if pattern.get(p) == Some(&'*') {
            p += 1;
            backtrack = Some((p, k));
            continue;
        }

        if p < pattern.len() {
            if let Some(next) = step(&pattern, p, key[k]) {
                p = next;
                k += 1;
                continue;
            }
        }

        match backtrack {
            Some((star_p, star_k)) => {
                p = star_p;
                k = star_k + 1;
                backtrack = Some((star_p, star_k + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match the single-character token at `p` against `c`, returning the
/// position just past the token.
fn step(pattern: &[char], p: usize, c: char) -> Option<usize> {
    match pattern[p] {
        '?' => Some(p + 1),
        '\\' if p + 1 < pattern.len() => (pattern[p + 1] == c).then_some(p + 2),
        '[' => {
            let (matched, next) = class(pattern, p + 1, c);
            matched.then_some(next)
        }
        literal => (literal == c).then_some(p + 1),
    }
}

/// Evaluate a set whose body starts at `p`. An unclosed set runs to the end
/// of the pattern, as in Redis.
fn class(pattern: &[char], mut p: usize, c: char) -> (bool, usize) {
    let negate = pattern.get(p) == Some(&'^');
    if negate {
        p += 1;
    }

    let mut matched = false;
    while p < pattern.len() {
        match pattern[p] {
            ']' => return (matched != negate, p + 1),
            '\\' if p + 1 < pattern.len() => {
                matched |= pattern[p + 1] == c;
                p += 2;
            }
            start if pattern.get(p + 1) == Some(&'-') && p + 2 < pattern.len() => {
                let end = pattern[p + 2];
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                matched |= (lo..=hi).contains(&c);
                p += 3;
            }
            literal => {
                matched |= literal == c;
                p += 1;
            }
        }
    }

    (matched != negate, p)
}
