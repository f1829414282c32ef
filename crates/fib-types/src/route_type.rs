//! Route types and their fixed per-type properties.

use crate::{ParseError, Scope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Unspec,
    /// Gateway or direct route.
    #[default]
    Unicast,
    /// Accept locally.
    Local,
    /// Accept locally as broadcast, send as broadcast.
    Broadcast,
    /// Accept locally as broadcast, send as unicast.
    Anycast,
    Multicast,
    /// Drop silently.
    Blackhole,
    /// Destination is unreachable.
    Unreachable,
    /// Administratively prohibited.
    Prohibit,
    /// Not in this table, continue the lookup elsewhere.
    Throw,
    Nat,
    XResolve,
}

/// Error a route type yields when it is the outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectKind {
    InvalidArgument,
    HostUnreachable,
    PermissionDenied,
    Retry,
}

/// Fixed properties of a [`RouteType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTypeProps {
    /// Error returned when a lookup lands on a route of this type.
    pub error: Option<RejectKind>,
    /// Narrowest scope a route of this type may be installed with.
    pub scope: Scope,
}

impl RouteType {
    /// Returns the default error and minimum scope for this type.
    pub const fn props(&self) -> RouteTypeProps {
        let (error, scope) = match self {
            RouteType::Unspec => (None, Scope::NOWHERE),
            RouteType::Unicast => (None, Scope::UNIVERSE),
            RouteType::Local => (None, Scope::HOST),
            RouteType::Broadcast => (None, Scope::LINK),
            RouteType::Anycast => (None, Scope::LINK),
            RouteType::Multicast => (None, Scope::UNIVERSE),
            RouteType::Blackhole => (Some(RejectKind::InvalidArgument), Scope::UNIVERSE),
            RouteType::Unreachable => (Some(RejectKind::HostUnreachable), Scope::UNIVERSE),
            RouteType::Prohibit => (Some(RejectKind::PermissionDenied), Scope::UNIVERSE),
            RouteType::Throw => (Some(RejectKind::Retry), Scope::UNIVERSE),
            RouteType::Nat => (Some(RejectKind::InvalidArgument), Scope::NOWHERE),
            RouteType::XResolve => (Some(RejectKind::InvalidArgument), Scope::NOWHERE),
        };
        RouteTypeProps { error, scope }
    }

    /// Returns true if routes of this type reject traffic instead of
    /// forwarding it.
    pub const fn is_reject(&self) -> bool {
        self.props().error.is_some()
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteType::Unspec => "unspec",
            RouteType::Unicast => "unicast",
            RouteType::Local => "local",
            RouteType::Broadcast => "broadcast",
            RouteType::Anycast => "anycast",
            RouteType::Multicast => "multicast",
            RouteType::Blackhole => "blackhole",
            RouteType::Unreachable => "unreachable",
            RouteType::Prohibit => "prohibit",
            RouteType::Throw => "throw",
            RouteType::Nat => "nat",
            RouteType::XResolve => "xresolve",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RouteType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unspec" => Ok(RouteType::Unspec),
            "unicast" => Ok(RouteType::Unicast),
            "local" => Ok(RouteType::Local),
            "broadcast" => Ok(RouteType::Broadcast),
            "anycast" => Ok(RouteType::Anycast),
            "multicast" => Ok(RouteType::Multicast),
            "blackhole" => Ok(RouteType::Blackhole),
            "unreachable" => Ok(RouteType::Unreachable),
            "prohibit" => Ok(RouteType::Prohibit),
            "throw" => Ok(RouteType::Throw),
            "nat" => Ok(RouteType::Nat),
            "xresolve" => Ok(RouteType::XResolve),
            _ => Err(ParseError::InvalidRouteType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_forwarding_types_have_no_error() {
        for rt in [
            RouteType::Unicast,
            RouteType::Local,
            RouteType::Broadcast,
            RouteType::Anycast,
            RouteType::Multicast,
        ] {
            assert!(!rt.is_reject(), "{} should forward", rt);
        }
    }

    #[test]
    fn test_reject_type_errors() {
        assert_eq!(
            RouteType::Unreachable.props().error,
            Some(RejectKind::HostUnreachable)
        );
        assert_eq!(
            RouteType::Prohibit.props().error,
            Some(RejectKind::PermissionDenied)
        );
        assert_eq!(RouteType::Throw.props().error, Some(RejectKind::Retry));
        assert_eq!(
            RouteType::Blackhole.props().error,
            Some(RejectKind::InvalidArgument)
        );
    }

    #[test]
    fn test_minimum_scopes() {
        assert_eq!(RouteType::Local.props().scope, Scope::HOST);
        assert_eq!(RouteType::Broadcast.props().scope, Scope::LINK);
        assert_eq!(RouteType::Unicast.props().scope, Scope::UNIVERSE);
    }

    #[test]
    fn test_parse_round_trip_names() {
        assert_eq!("Blackhole".parse::<RouteType>().unwrap(), RouteType::Blackhole);
        assert_eq!(RouteType::XResolve.to_string(), "xresolve");
        assert!("bogus".parse::<RouteType>().is_err());
    }
}
