use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// Reverse-name lookup for a scanned host.
///
/// Lookups are best effort: any failure is reported as "no name".
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String>;
}

/// PTR lookups through the system's configured name servers.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from the system resolver configuration, falling back to the
    /// default upstream servers when it cannot be read.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = match read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                debug!(error = %e, "system resolver config unavailable, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        match self.inner.reverse_lookup(IpAddr::V4(ip)).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|ptr| trim_fqdn(&ptr.to_string()))
                .filter(|name| !name.is_empty()),
            Err(e) => {
                debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}

/// Resolver used when the operator disables reverse lookups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

#[async_trait]
impl NameResolver for NoLookup {
    async fn resolve(&self, _ip: Ipv4Addr) -> Option<String> {
        None
    }
}

fn trim_fqdn(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_dot_is_removed() {
        assert_eq!(trim_fqdn("host.example.com."), "host.example.com");
        assert_eq!(trim_fqdn("host"), "host");
    }

    #[tokio::test]
    async fn no_lookup_never_names() {
        assert_eq!(NoLookup.resolve(Ipv4Addr::new(10, 0, 0, 1)).await, None);
    }
}
