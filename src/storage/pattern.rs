//! Shell-glob matching for key scans.
//!
//! Supported syntax:
//! - `*` matches any run of characters, including none
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from a class
//! - `[!abc]` / `[^abc]` match one character not in the class
//! - `\x` matches `x` literally
//!
//! Keys are matched as text. Keys that are not valid UTF-8 are decoded
//! lossily first, so matching never fails on binary keys.

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<char>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.chars().collect(),
        }
    }

    /// True when the pattern accepts every key.
    pub fn matches_all(&self) -> bool {
        !self.pattern.is_empty() && self.pattern.iter().all(|&c| c == '*')
    }

    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        glob_match(&self.pattern, &text)
    }

    /// Matches a binary key against the pattern using lossy UTF-8 decoding.
    pub fn matches_key(&self, key: &[u8]) -> bool {
        self.matches_all() || self.matches(&String::from_utf8_lossy(key))
    }
}

/// Single pass with backtracking to the most recent `*` only, so the cost
/// is at most `pattern.len() * text.len()` whatever the number of stars.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if pattern.get(p) == Some(&'*') {
            star = Some(p);
            p += 1;
            resume = t;
            continue;
        }

        if let Some(width) = match_token(&pattern[p..], text[t]) {
            p += width;
            t += 1;
            continue;
        }

        match star {
            Some(s) => {
                p = s + 1;
                resume += 1;
                t = resume;
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Width of the one-character token at the start of `pattern` when it
/// accepts `c`. Never called on `*`.
fn match_token(pattern: &[char], c: char) -> Option<usize> {
    let (&first, rest) = pattern.split_first()?;
    match first {
        '?' => Some(1),
        '[' => match match_class(rest, c) {
            Some((true, consumed)) => Some(1 + consumed),
            Some((false, _)) => None,
            // Unterminated class: treat '[' literally
            None => (c == '[').then_some(1),
        },
        '\\' if !rest.is_empty() => (rest[0] == c).then_some(2),
        literal => (literal == c).then_some(1),
    }
}

/// Matches `c` against a class body (the part after `[`).
///
/// Returns whether it matched and how many pattern chars the class used,
/// including the closing `]`, or `None` when the class is unterminated.
fn match_class(class: &[char], c: char) -> Option<(bool, usize)> {
    let mut i = 0;
    let negate = matches!(class.first(), Some('!') | Some('^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < class.len() {
        let current = class[i];
        // A ']' right after the opening (or the negation) is a literal
        if current == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let current = if current == '\\' && i + 1 < class.len() {
            i += 1;
            class[i]
        } else {
            current
        };

        if i + 2 < class.len() && class[i + 1] == '-' && class[i + 2] != ']' {
            let (lo, hi) = (current, class[i + 2]);
            if (lo <= c && c <= hi) || (hi <= c && c <= lo) {
                matched = true;
            }
            i += 3;
        } else {
            if current == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
