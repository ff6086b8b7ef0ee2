use super::{cursor_key, no_healthy, position, LoadBalancer};
use crate::error::SelectError;
use crate::store::SharedStore;
use log::{debug, warn};

/// Round-robin whose stored cursor always stays within `1..=len` of the
/// candidate list seen by the last writer.
///
/// A cursor that cannot be written never fails the selection; the pick for the
/// cursor that was read is served instead.
///
/// # Fields
/// * `max_retries` - Compare-and-set retries before the cursor write is skipped.
#[derive(Debug)]
pub struct WrappingRoundRobin {
    max_retries: usize,
}

impl Default for WrappingRoundRobin {
    fn default() -> Self {
        Self { max_retries: 8 }
    }
}

impl WrappingRoundRobin {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }
}

impl LoadBalancer for WrappingRoundRobin {
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
        let len = healthy.len();
        let mut retries = 0;

        loop {
            let raw = store.get(&key);
            let cursor = raw
                .as_deref()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(1);
            let index = position(cursor, len);
            let next = (index + 1) % len + 1;

            match store.compare_and_set(&key, raw.as_deref(), &next.to_string()) {
                Ok(true) => {
                    debug!("Host {host}: cursor {cursor} of {len} selects {}", healthy[index]);
                    return Ok(healthy[index].clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Cursor of host {host} could not be advanced: {e}");
                    return Ok(healthy[index].clone());
                }
            }

            retries += 1;
            if retries > self.max_retries {
                warn!("Cursor of host {host} is contended, serving without advancing");
                return Ok(healthy[index].clone());
            }
        }
    }
}
