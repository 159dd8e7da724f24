//! Validated run identifier: `[A-Za-z0-9._-]{1,64}`.

use crate::error::EngineError;
use std::fmt;

pub const MAX_RUN_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(id: &str) -> bool {
        !id.is_empty()
            && id.len() <= MAX_RUN_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    }
}

impl TryFrom<String> for RunId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::InvalidRunId(value))
        }
    }
}

impl TryFrom<&str> for RunId {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(RunId::try_from("run-1.local_ok").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(RunId::try_from("").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(MAX_RUN_ID_LEN + 1);
        assert!(RunId::try_from(long).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(RunId::try_from("run id with spaces").is_err());
        assert!(RunId::try_from("run/id").is_err());
    }

    #[test]
    fn accepts_boundary_length() {
        let exact = "a".repeat(MAX_RUN_ID_LEN);
        assert!(RunId::try_from(exact).is_ok());
    }
}
