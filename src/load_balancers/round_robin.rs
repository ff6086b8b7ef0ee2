use super::{cursor_key, no_healthy, position, LoadBalancer};
use crate::error::{SelectError, StoreError};
use crate::store::SharedStore;
use log::{debug, warn};

/// Round-robin over a cursor that only ever grows.
///
/// The stored cursor is the 1-based index of the next upstream to try and is
/// reduced modulo the candidate count only when read. When the candidate set
/// changes size between two selections the served sequence can skip or repeat
/// entries relative to a plain rotation over the new set.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl LoadBalancer for RoundRobin {
    fn select(
        &self,
        store: &dyn SharedStore,
        host: &str,
        healthy: &[String],
    ) -> Result<String, SelectError> {
        if healthy.is_empty() {
            return Err(no_healthy(host));
        }

        let key = cursor_key(host);
        // an absent cursor reads as 1, so it is initialized to 1 before the increment
        let cursor = match store.incr(&key, 1, 1) {
            Ok(next) => next.wrapping_sub(1),
            Err(StoreError::NotANumber { .. }) => {
                warn!("Cursor of host {host} is corrupt, restarting rotation");
                if let Err(e) = store.set(&key, "2") {
                    warn!("Failed to reset cursor of host {host}: {e}");
                }
                1
            }
            Err(e) => {
                warn!("Cursor of host {host} could not be advanced: {e}");
                1
            }
        };

        let upstream = &healthy[position(cursor, healthy.len())];
        debug!("Host {host}: cursor {cursor} of {} selects {upstream}", healthy.len());
        Ok(upstream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_covers_each_upstream_once() {
        let store = MemoryStore::new();
        let healthy = addrs(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);

        let picks: Vec<String> = (0..3)
            .map(|_| RoundRobin.select(&store, "h", &healthy).unwrap())
            .collect();
        assert_eq!(picks, healthy);

        let again: Vec<String> = (0..3)
            .map(|_| RoundRobin.select(&store, "h", &healthy).unwrap())
            .collect();
        assert_eq!(again, healthy);
    }

    #[test]
    fn test_cursor_grows_without_bound() {
        let store = MemoryStore::new();
        let healthy = addrs(&["a:1", "b:1"]);
        for _ in 0..5 {
            RoundRobin.select(&store, "h", &healthy).unwrap();
        }
        assert_eq!(store.get("cursor:h").as_deref(), Some("6"));
    }

    #[test]
    fn test_empty_list_leaves_cursor_untouched() {
        let store = MemoryStore::new();
        assert!(matches!(
            RoundRobin.select(&store, "h", &[]),
            Err(SelectError::NoHealthyUpstream { .. })
        ));
        assert!(store.get("cursor:h").is_none());
    }

    #[test]
    fn test_shrinking_set_is_reduced_on_read() {
        let store = MemoryStore::new();
        let three = addrs(&["a:1", "b:1", "c:1"]);
        RoundRobin.select(&store, "h", &three).unwrap();
        RoundRobin.select(&store, "h", &three).unwrap();

        // cursor is now 3, which maps to the first entry of a two entry list
        let two = addrs(&["a:1", "b:1"]);
        assert_eq!(RoundRobin.select(&store, "h", &two).unwrap(), "a:1");
        assert_eq!(RoundRobin.select(&store, "h", &two).unwrap(), "b:1");
    }

    #[test]
    fn test_hosts_rotate_independently() {
        let store = MemoryStore::new();
        let healthy = addrs(&["a:1", "b:1"]);
        assert_eq!(RoundRobin.select(&store, "x", &healthy).unwrap(), "a:1");
        assert_eq!(RoundRobin.select(&store, "y", &healthy).unwrap(), "a:1");
        assert_eq!(RoundRobin.select(&store, "x", &healthy).unwrap(), "b:1");
    }

    #[test]
    fn test_corrupt_cursor_restarts_rotation() {
        let store = MemoryStore::new();
        store.set("cursor:h", "garbage").unwrap();
        let healthy = addrs(&["a:1", "b:1"]);
        assert_eq!(RoundRobin.select(&store, "h", &healthy).unwrap(), "a:1");
        assert_eq!(RoundRobin.select(&store, "h", &healthy).unwrap(), "b:1");
    }

    #[test]
    fn test_full_store_serves_first_upstream() {
        let store = MemoryStore::with_capacity(0);
        let healthy = addrs(&["a:1", "b:1"]);
        assert_eq!(RoundRobin.select(&store, "h", &healthy).unwrap(), "a:1");
        assert_eq!(RoundRobin.select(&store, "h", &healthy).unwrap(), "a:1");
        assert!(store.get("cursor:h").is_none());
    }

    #[test]
    fn test_concurrent_selections_never_reuse_cursor() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 300;
        let store = MemoryStore::new();
        let healthy = addrs(&["a:1", "b:1", "c:1"]);

        let picks: Vec<Vec<String>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..ROUNDS)
                            .map(|_| RoundRobin.select(&store, "h", &healthy).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let total = THREADS * ROUNDS;
        assert_eq!(store.get("cursor:h"), Some((total + 1).to_string()));

        let mut counts = std::collections::HashMap::new();
        for pick in picks.into_iter().flatten() {
            *counts.entry(pick).or_insert(0) += 1;
        }
        for upstream in &healthy {
            assert_eq!(counts[upstream], total / healthy.len(), "{upstream}");
        }
    }
}
