//! Subject helpers. Subjects are `.`-delimited; `*` in a pattern matches
//! exactly one token.

pub const WILDCARD: &str = "*";

/// True when `subject` has as many tokens as `pattern` and every token is
/// equal or matched by a `*`.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) if p == WILDCARD || p == s => {}
            _ => return false,
        }
    }
}

/// Makes an owner or repository name safe to use as one subject token.
#[must_use]
pub fn token(name: &str) -> String {
    name.replace('.', "~")
}

/// Builds `<prefix>.<owner>.<repo>.<event_type>`.
#[must_use]
pub fn for_repository(prefix: &str, owner: &str, repo: &str, event_type: &str) -> String {
    format!("{prefix}.{}.{}.{event_type}", token(owner), token(repo))
}
