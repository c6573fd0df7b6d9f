//! Host locality classification.
//!
//! A group is local when its host is the loopback address, `localhost`, the
//! machine's own hostname, or resolves to the same first address as the
//! machine's hostname. A resolution failure is an error: locality is never
//! guessed.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use crate::config::Group;
use crate::error::{LaunchError, Result};


/// Resolves a host name to its first usable address.
pub trait AddressResolver {
    fn resolve(&self, host: &str) -> io::Result<IpAddr>;
}

/// Resolver backed by the system's name service. IPv4 addresses are
/// preferred when a name has several.
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        let addrs: Vec<IpAddr> = (host, 0).to_socket_addrs()?.map(|a| a.ip()).collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses"))
    }
}

/// The hostname reported by the operating system.
pub fn local_hostname() -> io::Result<String> {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}


/// Decides whether hosts refer to the local machine.
pub struct HostClassifier {
    hostname: String,
    resolver: Box<dyn AddressResolver>,
}

impl HostClassifier {
    pub fn new(hostname: impl Into<String>, resolver: Box<dyn AddressResolver>) -> Self {
        HostClassifier {
            hostname: hostname.into(),
            resolver,
        }
    }

    /// Classifier for this machine using the system resolver.
    pub fn system() -> Result<Self> {
        let hostname = local_hostname().map_err(|e| LaunchError::HostResolution {
            group: "-".into(),
            host: "localhost".into(),
            message: format!("gethostname failed: {}", e),
        })?;
        Ok(HostClassifier::new(hostname, Box::new(SystemResolver)))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// True when `host` is this machine. `group` is only used for error
    /// reporting.
    pub fn is_local(&self, group: &str, host: &str) -> Result<bool> {
        if host == "127.0.0.1" || host == "localhost" || host == self.hostname {
            return Ok(true);
        }
        let resolve = |name: &str| {
            self.resolver
                .resolve(name)
                .map_err(|e| LaunchError::HostResolution {
                    group: group.to_string(),
                    host: name.to_string(),
                    message: e.to_string(),
                })
        };
        let candidate = resolve(host)?;
        let local = resolve(&self.hostname)?;
        debug!(group, host, %candidate, %local, "resolved for locality check");
        Ok(candidate.to_string() == local.to_string())
    }

    /// Classify every group up front, in order. The first failure aborts.
    pub fn classify_all(&self, groups: &[Group]) -> Result<Vec<bool>> {
        groups
            .iter()
            .map(|g| self.is_local(&g.name, g.host()))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use std::collections::HashMap;

    struct TableResolver(HashMap<&'static str, &'static str>);

    impl AddressResolver for TableResolver {
        fn resolve(&self, host: &str) -> io::Result<IpAddr> {
            self.0
                .get(host)
                .map(|ip| ip.parse().unwrap())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
        }
    }

    fn classifier() -> HostClassifier {
        let table = HashMap::from([
            ("me", "10.0.0.1"),
            ("me-alias", "10.0.0.1"),
            ("node2", "10.0.0.2"),
        ]);
        HostClassifier::new("me", Box::new(TableResolver(table)))
    }

    #[test]
    fn literal_matches_skip_resolution() {
        let c = HostClassifier::new("me", Box::new(TableResolver(HashMap::new())));
        assert!(c.is_local("g", "127.0.0.1").unwrap());
        assert!(c.is_local("g", "localhost").unwrap());
        assert!(c.is_local("g", "me").unwrap());
    }

    #[test]
    fn hostname_match_is_case_sensitive() {
        let c = classifier();
        // "ME" is not a literal match and does not resolve.
        assert!(c.is_local("g", "ME").is_err());
    }

    #[test]
    fn resolved_addresses_are_compared() {
        let c = classifier();
        assert!(c.is_local("g", "me-alias").unwrap());
        assert!(!c.is_local("g", "node2").unwrap());
    }

    #[test]
    fn resolution_failure_is_fatal() {
        let c = classifier();
        let err = c.is_local("g7", "ghost").unwrap_err();
        match err {
            LaunchError::HostResolution { group, host, .. } => {
                assert_eq!(group, "g7");
                assert_eq!(host, "ghost");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn classify_all_keeps_order() {
        let c = classifier();
        let groups = vec![
            Group::new("a", Endpoint::parse("node2"), "/h"),
            Group::new("b", Endpoint::parse("ops@localhost"), "/h"),
        ];
        assert_eq!(c.classify_all(&groups).unwrap(), vec![false, true]);
    }

    #[test]
    fn system_hostname_is_not_empty() {
        assert!(!local_hostname().unwrap().is_empty());
    }
}
