use crate::error::RegistryError;
use crate::load_balancers::Strategy;
use crate::registry::{Registry, WriteMode};
use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Process configuration, read from a ron file.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Address of the admin HTTP listener.
    #[serde(default = "default_admin_listen")]
    pub admin_listen: SocketAddr,
    /// Address of the proxy listener.
    #[serde(default = "default_proxy_listen")]
    pub proxy_listen: SocketAddr,
    /// Selection strategy shared by every host.
    #[serde(default)]
    pub load_balancer: Strategy,
    /// How registry updates are written to the store.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Maximum number of keys the shared store may hold.
    #[serde(default)]
    pub store_capacity: Option<usize>,
    /// Upstreams registered at startup.
    #[serde(default)]
    pub hosts: Vec<Host>,
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9180))
}

fn default_proxy_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9080))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_listen: default_admin_listen(),
            proxy_listen: default_proxy_listen(),
            load_balancer: Strategy::default(),
            write_mode: WriteMode::default(),
            store_capacity: None,
            hosts: Vec::new(),
        }
    }
}

impl Config {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(raw)?)
    }

    pub async fn read_from_file(path: &Path) -> anyhow::Result<Self> {
        let config = Self::parse(&async_std::fs::read_to_string(path).await?)?;
        debug!("Loaded config file {}, {config:#?}", path.display());
        Ok(config)
    }

    /// Registers every configured upstream.
    ///
    /// Host names are lower-cased. Upstreams already present in the store are
    /// left as they are.
    pub fn seed(&self, registry: &Registry) -> anyhow::Result<()> {
        for host in &self.hosts {
            let name = host.name.to_lowercase();
            for upstream in &host.upstreams {
                match registry.add(&name, &upstream.addr.to_string()) {
                    Ok(_) | Err(RegistryError::Conflict { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            info!("Seeded host {name} with {} upstreams", host.upstreams.len());
        }
        Ok(())
    }
}

/// Upstreams of one host as written in the config file.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Host {
    /// Name of the host.
    pub name: String,
    /// List of upstream servers.
    pub upstreams: Vec<Upstream>,
}

/// Represents an upstream server with its socket address.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Upstream {
    /// Socket address of the upstream server.
    pub addr: SocketAddr,
}

// region Deserialize Impls

impl<'de> Deserialize<'de> for Upstream {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Upstream {
            addr: SocketAddr::deserialize(deserializer)?,
        })
    }
}

impl Serialize for Upstream {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.addr.serialize(serializer)
    }
}
// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::registry;

    const SAMPLE: &str = r#"(
        admin_listen: "0.0.0.0:9180",
        load_balancer: WrappingRoundRobin,
        write_mode: CompareAndSwap(max_retries: 4),
        hosts: [
            (name: "API.example.com", upstreams: ["10.0.0.1:80", "10.0.0.2:80"]),
            (name: "default", upstreams: ["127.0.0.1:8000"]),
        ],
    )"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.admin_listen, "0.0.0.0:9180".parse::<SocketAddr>().unwrap());
        assert_eq!(config.proxy_listen, default_proxy_listen());
        assert_eq!(config.load_balancer, Strategy::WrappingRoundRobin);
        assert_eq!(config.write_mode, WriteMode::CompareAndSwap { max_retries: 4 });
        assert_eq!(config.hosts.len(), 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("()").unwrap();
        assert_eq!(config.load_balancer, Strategy::RoundRobin);
        assert_eq!(config.write_mode, WriteMode::default());
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_rejects_bad_upstream() {
        assert!(Config::parse(r#"(hosts: [(name: "h", upstreams: ["nope"])])"#).is_err());
    }

    #[test]
    fn test_seed_is_repeatable() {
        let config = Config::parse(SAMPLE).unwrap();
        let registry = registry();
        config.seed(&registry).unwrap();
        config.seed(&registry).unwrap();
        assert_eq!(
            registry.healthy("api.example.com"),
            vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()]
        );
        assert_eq!(registry.hosts(10), vec!["api.example.com", "default"]);
    }
}
