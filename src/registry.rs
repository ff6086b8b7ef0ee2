use crate::error::RegistryError;
use crate::store::SharedStore;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Host used when a request does not name one.
pub const DEFAULT_HOST: &str = "default";

const UPSTREAMS_PREFIX: &str = "upstreams:";

/// Eligibility state of one backend address.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct UpstreamEntry {
    pub healthy: bool,
    /// Stored for operators, never read by selection.
    pub weight: u32,
}

impl Default for UpstreamEntry {
    fn default() -> Self {
        Self {
            healthy: true,
            weight: 1,
        }
    }
}

/// Upstreams of a single host, keyed by `ip:port`.
///
/// Ordered so that the healthy list handed to the selector is the same for
/// every request as long as the set itself does not change.
pub type HostUpstreams = BTreeMap<String, UpstreamEntry>;

/// An upstream together with the host it belongs to, as reported to callers.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct UpstreamRecord {
    pub host: String,
    pub upstream: String,
    pub healthy: bool,
    pub weight: u32,
}

impl UpstreamRecord {
    fn new(host: &str, upstream: &str, entry: UpstreamEntry) -> Self {
        Self {
            host: host.to_owned(),
            upstream: upstream.to_owned(),
            healthy: entry.healthy,
            weight: entry.weight,
        }
    }
}

/// How a host's map is written back after it has been modified.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub enum WriteMode {
    /// Plain `set`. Two concurrent writers to the same host can silently lose
    /// one of the updates.
    LastWriterWins,
    /// `compare_and_set` against the value that was read, re-running the
    /// whole read-modify-write cycle when another writer got in between.
    CompareAndSwap { max_retries: usize },
}

impl Default for WriteMode {
    fn default() -> Self {
        Self::CompareAndSwap { max_retries: 16 }
    }
}

/// Registry of upstreams per host, persisted in a [`SharedStore`].
///
/// There is no in-memory copy: every call re-reads the host's whole map from
/// the store and every mutation replaces it whole.
#[derive(Debug, Clone)]
pub struct Registry {
    store: Arc<dyn SharedStore>,
    write_mode: WriteMode,
}

fn upstreams_key(host: &str) -> String {
    format!("{UPSTREAMS_PREFIX}{host}")
}

fn decode(host: &str, raw: Option<&str>) -> HostUpstreams {
    let Some(raw) = raw else {
        return HostUpstreams::new();
    };

    serde_json::from_str(raw).unwrap_or_else(|e| {
        error!("Failed to decode upstreams of host {host}: {e}");
        HostUpstreams::new()
    })
}

fn non_empty<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str, RegistryError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RegistryError::BadRequest(format!("missing {what}")))
}

impl Registry {
    pub fn new(store: Arc<dyn SharedStore>, write_mode: WriteMode) -> Self {
        Self { store, write_mode }
    }

    /// Returns the shared store the registry persists into.
    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    /// Fetches the upstreams of `host`.
    ///
    /// Absent or undecodable values yield an empty map; decode failures are
    /// logged and never reach the caller.
    pub fn get(&self, host: &str) -> HostUpstreams {
        decode(host, self.store.get(&upstreams_key(host)).as_deref())
    }

    /// Healthy addresses of `host`, in map order.
    pub fn healthy(&self, host: &str) -> Vec<String> {
        self.get(host)
            .into_iter()
            .filter(|(_, entry)| entry.healthy)
            .map(|(addr, _)| addr)
            .collect()
    }

    /// Lists every upstream of `host`.
    pub fn list(&self, host: &str) -> Vec<UpstreamRecord> {
        self.get(host)
            .into_iter()
            .map(|(addr, entry)| UpstreamRecord::new(host, &addr, entry))
            .collect()
    }

    /// Lists the first `limit` hosts that have a registry entry, sorted by name.
    ///
    /// The whole key space is scanned, so cursor keys never eat into `limit`.
    pub fn hosts(&self, limit: usize) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .store
            .get_keys(0)
            .into_iter()
            .filter_map(|key| key.strip_prefix(UPSTREAMS_PREFIX).map(str::to_owned))
            .collect();
        hosts.sort();
        hosts.truncate(limit);
        hosts
    }

    /// Registers `upstream` under `host` as healthy with weight 1.
    ///
    /// # Errors
    /// * `Conflict` if the upstream is already registered; nothing is written.
    /// * `Storage` / `Contended` if the new map could not be stored.
    pub fn add(&self, host: &str, upstream: &str) -> Result<UpstreamRecord, RegistryError> {
        let host = non_empty(Some(host), "host")?;
        let upstream = non_empty(Some(upstream), "upstream")?;

        let entry = self.update(host, |upstreams| {
            if upstreams.contains_key(upstream) {
                return Err(RegistryError::Conflict {
                    host: host.to_owned(),
                    upstream: upstream.to_owned(),
                });
            }
            let entry = UpstreamEntry::default();
            upstreams.insert(upstream.to_owned(), entry);
            Ok(entry)
        })?;

        info!("Added upstream {upstream} to host {host}");
        Ok(UpstreamRecord::new(host, upstream, entry))
    }

    /// Unregisters `upstream` from `host`.
    ///
    /// Both parts must be present; unlike [`Registry::add`] there is no
    /// implicit default host. The host keeps an empty map once its last
    /// upstream is gone.
    ///
    /// # Errors
    /// * `BadRequest` if either part is missing, before the store is touched.
    /// * `NotFound` if the upstream is not registered.
    /// * `Storage` / `Contended` if the new map could not be stored.
    pub fn remove(&self, host: Option<&str>, upstream: Option<&str>) -> Result<(), RegistryError> {
        let host = non_empty(host, "host")?;
        let upstream = non_empty(upstream, "upstream")?;

        self.update(host, |upstreams| {
            upstreams
                .remove(upstream)
                .map(|_| ())
                .ok_or_else(|| RegistryError::NotFound {
                    host: host.to_owned(),
                    upstream: upstream.to_owned(),
                })
        })?;

        info!("Removed upstream {upstream} from host {host}");
        Ok(())
    }

    /// Sets the health flag of a registered upstream.
    pub fn set_healthy(
        &self,
        host: &str,
        upstream: &str,
        healthy: bool,
    ) -> Result<UpstreamRecord, RegistryError> {
        let entry = self.update(host, |upstreams| {
            let entry = upstreams
                .get_mut(upstream)
                .ok_or_else(|| RegistryError::NotFound {
                    host: host.to_owned(),
                    upstream: upstream.to_owned(),
                })?;
            entry.healthy = healthy;
            Ok(*entry)
        })?;

        info!("Marked upstream {upstream} of host {host} as {}", if healthy { "up" } else { "down" });
        Ok(UpstreamRecord::new(host, upstream, entry))
    }

    /// Runs one read-modify-write cycle over the map of `host`.
    ///
    /// `modify` is re-run on a freshly read map for every retry, so its checks
    /// always see the latest state.
    fn update<T>(
        &self,
        host: &str,
        mut modify: impl FnMut(&mut HostUpstreams) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let key = upstreams_key(host);
        let attempts = match self.write_mode {
            WriteMode::LastWriterWins => 1,
            WriteMode::CompareAndSwap { max_retries } => max_retries + 1,
        };

        for attempt in 0..attempts {
            let raw = self.store.get(&key);
            let mut upstreams = decode(host, raw.as_deref());
            let out = modify(&mut upstreams)?;
            let encoded = serde_json::to_string(&upstreams)?;

            match self.write_mode {
                WriteMode::LastWriterWins => {
                    self.store.set(&key, &encoded)?;
                    return Ok(out);
                }
                WriteMode::CompareAndSwap { .. } => {
                    if self.store.compare_and_set(&key, raw.as_deref(), &encoded)? {
                        return Ok(out);
                    }
                    debug!("Upstreams of host {host} changed concurrently, retry {}", attempt + 1);
                }
            }
        }

        Err(RegistryError::Contended {
            host: host.to_owned(),
        })
    }
}
