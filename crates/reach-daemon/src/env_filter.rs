//! Secret-shaped environment variable filtering. The engine process
//! itself reads no environment (controls and policy always arrive over
//! the wire), but the daemon logs its own startup environment for
//! operational visibility and must never let a credential-shaped
//! variable reach a log line.

const SENSITIVE_SUBSTRINGS: &[&str] =
    &["SECRET", "TOKEN", "KEY", "PASSWORD", "CREDENTIAL", "AUTH", "COOKIE", "SESSION"];

/// Returns `true` if `name` looks like it holds a credential and should
/// be redacted before logging. Matching is case-insensitive and by
/// substring: prefer a wider net over a missed secret.
#[must_use]
pub fn should_filter(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_SUBSTRINGS.iter().any(|needle| upper.contains(needle))
}
