//! Reachability scope.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordinal reachability scope.
///
/// Uses the kernel numbering: a numerically smaller scope reaches further.
/// `UNIVERSE < SITE < LINK < HOST < NOWHERE`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct Scope(u8);

impl Scope {
    /// Reachable from anywhere.
    pub const UNIVERSE: Self = Self(0);
    /// Interior routes within one site.
    pub const SITE: Self = Self(200);
    /// Directly attached link.
    pub const LINK: Self = Self(253);
    /// Local to this host.
    pub const HOST: Self = Self(254);
    /// Reaches no destination.
    pub const NOWHERE: Self = Self(255);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Returns the next narrower scope, saturating at [`Scope::NOWHERE`].
    pub const fn narrower(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Scope::UNIVERSE => write!(f, "universe"),
            Scope::SITE => write!(f, "site"),
            Scope::LINK => write!(f, "link"),
            Scope::HOST => write!(f, "host"),
            Scope::NOWHERE => write!(f, "nowhere"),
            Scope(raw) => write!(f, "{}", raw),
        }
    }
}

impl FromStr for Scope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "universe" | "global" => Ok(Scope::UNIVERSE),
            "site" => Ok(Scope::SITE),
            "link" => Ok(Scope::LINK),
            "host" => Ok(Scope::HOST),
            "nowhere" => Ok(Scope::NOWHERE),
            other => other
                .parse::<u8>()
                .map(Scope)
                .map_err(|_| ParseError::InvalidScope(s.to_string())),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for Scope {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_ordering() {
        assert!(Scope::UNIVERSE < Scope::SITE);
        assert!(Scope::SITE < Scope::LINK);
        assert!(Scope::LINK < Scope::HOST);
        assert!(Scope::HOST < Scope::NOWHERE);
    }

    #[test]
    fn test_scope_narrower_saturates() {
        assert_eq!(Scope::LINK.narrower(), Scope::HOST);
        assert_eq!(Scope::NOWHERE.narrower(), Scope::NOWHERE);
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("link".parse::<Scope>().unwrap(), Scope::LINK);
        assert_eq!("HOST".parse::<Scope>().unwrap(), Scope::HOST);
        assert_eq!("42".parse::<Scope>().unwrap(), Scope::new(42));
        assert!("galaxy".parse::<Scope>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Scope::UNIVERSE.to_string(), "universe");
        assert_eq!(Scope::new(17).to_string(), "17");
    }
}
