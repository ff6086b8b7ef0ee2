mod round_robin;
mod wrapping_round_robin;

use crate::error::SelectError;
use crate::store::SharedStore;
pub use round_robin::RoundRobin;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
pub use wrapping_round_robin::WrappingRoundRobin;

/// Picks one upstream out of a host's healthy list.
///
/// Implementations keep their rotation state in the shared store, so every
/// worker sharing the store shares the rotation.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Selects the next upstream of `host` from `healthy`.
    ///
    /// # Arguments
    /// * `store` - Store holding the rotation cursor.
    /// * `host` - Host whose cursor is advanced.
    /// * `healthy` - Candidate addresses, in the order observed for this call.
    ///
    /// # Returns
    /// The selected address, or `NoHealthyUpstream` if `healthy` is empty.
    fn select(
        &self,
        store: &dyn SharedStore,
        host: &str,
        healthy: &[String],
    ) -> Result<String, SelectError>;
}

/// Enumeration of available selection strategies.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Strategy {
    /// Cursor grows forever and is reduced modulo the candidate count on read.
    RoundRobin,
    /// Cursor is stored already reduced modulo the candidate count.
    WrappingRoundRobin,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl Strategy {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Arc::new(RoundRobin),
            Strategy::WrappingRoundRobin => Arc::new(WrappingRoundRobin::default()),
        }
    }
}

fn cursor_key(host: &str) -> String {
    format!("cursor:{host}")
}

/// Zero-based position of the 1-based `cursor` in a list of `len` entries.
fn position(cursor: i64, len: usize) -> usize {
    cursor.wrapping_sub(1).rem_euclid(len as i64) as usize
}

fn no_healthy(host: &str) -> SelectError {
    SelectError::NoHealthyUpstream {
        host: host.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_wraps() {
        assert_eq!(position(1, 3), 0);
        assert_eq!(position(3, 3), 2);
        assert_eq!(position(4, 3), 0);
        assert_eq!(position(i64::MIN, 3), (i64::MAX).rem_euclid(3) as usize);
    }

    #[test]
    fn test_default_strategy() {
        assert_eq!(Strategy::default(), Strategy::RoundRobin);
        assert_eq!(
            ron::from_str::<Strategy>("WrappingRoundRobin").unwrap(),
            Strategy::WrappingRoundRobin
        );
    }
}
