//! `user@host:port` endpoint decomposition.

use serde::{Deserialize, Serialize};


/// Host used when an endpoint is absent or cannot be decomposed.
pub const LOOPBACK: &str = "127.0.0.1";

/// A decomposed endpoint. `user` and `port` may be empty; `host` never is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub user: String,
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn loopback() -> Self {
        Endpoint {
            user: String::new(),
            host: LOOPBACK.to_string(),
            port: String::new(),
        }
    }

    /// Decompose an endpoint string. Total: malformed input yields the
    /// loopback endpoint instead of an error.
    ///
    /// When both `@` and `:` appear the string is split on `@` first and the
    /// remainder on `:`.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_else(Self::loopback)
    }

    fn try_parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (user, rest) = match raw.split_once('@') {
            Some((user, rest)) => (user, rest),
            None => ("", raw),
        };
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (host, port),
            None => (rest, ""),
        };
        if host.is_empty() || host.contains('@') || port.contains(':') {
            return None;
        }
        if raw.contains('@') && user.is_empty() {
            return None;
        }
        Some(Endpoint {
            user: user.to_string(),
            host: host.to_string(),
            port: port.to_string(),
        })
    }

    /// `user@host`, or just `host` when no user was given.
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn triple(e: &Endpoint) -> (&str, &str, &str) {
        (e.user.as_str(), e.host.as_str(), e.port.as_str())
    }

    #[test]
    fn user_host_port() {
        assert_eq!(triple(&Endpoint::parse("a@b:c")), ("a", "b", "c"));
    }

    #[test]
    fn user_host() {
        assert_eq!(triple(&Endpoint::parse("a@b")), ("a", "b", ""));
    }

    #[test]
    fn host_port() {
        assert_eq!(triple(&Endpoint::parse("b:c")), ("", "b", "c"));
    }

    #[test]
    fn bare_host() {
        assert_eq!(triple(&Endpoint::parse("b")), ("", "b", ""));
    }

    #[test]
    fn malformed_falls_back_to_loopback() {
        for raw in ["", "@", "a@", "@b", ":22", "a@b@c", "b:1:2", "   "] {
            assert_eq!(Endpoint::parse(raw), Endpoint::loopback(), "input {:?}", raw);
        }
    }

    #[test]
    fn never_invents_a_user() {
        for raw in ["node1", "node1:2222", "10.0.0.5"] {
            assert!(Endpoint::parse(raw).user.is_empty());
        }
    }

    #[test]
    fn destination_omits_empty_user() {
        assert_eq!(Endpoint::parse("node1:22").destination(), "node1");
        assert_eq!(Endpoint::parse("ops@node1").destination(), "ops@node1");
    }
}
