//! Call identifiers and participant roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, caller-provided call identifier. Unique while the session lives;
/// the registry does not reuse it across incarnations (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two participant roles. Exactly one leg per role per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Scammer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "operator" => Some(Role::Operator),
            "scammer" => Some(Role::Scammer),
            _ => None,
        }
    }

    pub fn other(&self) -> Role {
        match self {
            Role::Operator => Role::Scammer,
            Role::Scammer => Role::Operator,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Scammer => "scammer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_other_is_involutive() {
        assert_eq!(Role::Operator.other(), Role::Scammer);
        assert_eq!(Role::Scammer.other().other(), Role::Scammer);
    }

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse("operator"), Some(Role::Operator));
    }
}
