use crate::error::{DispatchError, SelectError};
use crate::load_balancers::LoadBalancer;
use crate::registry::{Registry, DEFAULT_HOST};
use log::{debug, warn};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Backend chosen for a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Peer {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// Commits the chosen backend for the current connection.
pub trait PeerCommit {
    fn commit(&mut self, ip: &str, port: u16) -> Result<(), DispatchError>;
}

/// [`PeerCommit`] that resolves the peer to a socket address for a later
/// connect.
#[derive(Debug, Default)]
pub struct SocketPeer {
    pub addr: Option<SocketAddr>,
}

impl PeerCommit for SocketPeer {
    fn commit(&mut self, ip: &str, port: u16) -> Result<(), DispatchError> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| DispatchError::Commit(format!("{ip} is not an ip address: {e}")))?;
        self.addr = Some(SocketAddr::new(ip, port));
        Ok(())
    }
}

/// Splits an `ip:port` upstream address.
///
/// IPv6 literals must be bracketed (`[::1]:80`).
pub fn parse_address(addr: &str) -> Result<Peer, SelectError> {
    let malformed = || SelectError::MalformedAddress(addr.to_owned());

    let (ip, port) = addr.rsplit_once(':').ok_or_else(malformed)?;
    let ip = match ip.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(malformed)?,
        None if ip.contains(':') => return Err(malformed()),
        None => ip,
    };
    if ip.is_empty() {
        return Err(malformed());
    }
    let port = port.parse::<u16>().map_err(|_| malformed())?;

    Ok(Peer {
        ip: ip.to_owned(),
        port,
    })
}

/// Normalizes a `Host` header value into a registry host.
///
/// Missing or blank values map to [`DEFAULT_HOST`].
pub fn resolve_host(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return DEFAULT_HOST.to_owned();
    };

    // bracketed ipv6 keeps its brackets, only the port goes
    let host = if raw.starts_with('[') {
        raw.find(']').map_or(raw, |end| &raw[..=end])
    } else {
        raw.split_once(':').map_or(raw, |(h, _)| h)
    };
    host.to_lowercase()
}

/// Per-connection hook: picks a healthy upstream of the requested host and
/// commits it as the connection's peer.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Registry,
    load_balancer: Arc<dyn LoadBalancer>,
}

impl Dispatcher {
    pub fn new(registry: Registry, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            registry,
            load_balancer,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Selects and commits the next upstream for `host`.
    ///
    /// Nothing is committed on error; the caller falls back to its own
    /// handling of an unrouted connection.
    pub fn dispatch(
        &self,
        host: Option<&str>,
        peer: &mut impl PeerCommit,
    ) -> Result<Peer, DispatchError> {
        let host = host.filter(|h| !h.is_empty()).unwrap_or(DEFAULT_HOST);
        let healthy = self.registry.healthy(host);

        let upstream = match self
            .load_balancer
            .select(self.registry.store().as_ref(), host, &healthy)
        {
            Ok(upstream) => upstream,
            Err(e @ SelectError::NoHealthyUpstream { .. }) => {
                warn!("{e}");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let selected = parse_address(&upstream)?;
        peer.commit(&selected.ip, selected.port)?;
        debug!("Host {host} dispatched to {selected}");
        Ok(selected)
    }
}
