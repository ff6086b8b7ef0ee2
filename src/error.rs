use thiserror::Error;

/// Errors returned by a [`SharedStore`](crate::store::SharedStore) write.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// The store has no room left for a new key.
    #[error("no memory left in shared store for key {key:?}")]
    NoMemory { key: String },
    /// `incr` was called on a key holding a non-integer value.
    #[error("value under key {key:?} is not a number")]
    NotANumber { key: String },
}

/// Errors of the upstream registry write path.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("upstream {upstream} already exists for host {host}")]
    Conflict { host: String, upstream: String },

    #[error("upstream {upstream} not found for host {host}")]
    NotFound { host: String, upstream: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("failed to store upstreams: {0}")]
    Storage(#[from] StoreError),

    /// Every compare-and-set attempt lost against a concurrent writer.
    #[error("too many concurrent updates for host {host}")]
    Contended { host: String },

    #[error("failed to encode upstreams: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors of upstream selection.
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no healthy upstream for host {host}")]
    NoHealthyUpstream { host: String },

    #[error("malformed upstream address {0:?}, expected ip:port")]
    MalformedAddress(String),
}

/// Errors of the per-connection dispatch hook.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("failed to commit peer: {0}")]
    Commit(String),
}
