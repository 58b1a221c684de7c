use std::{
    sync::Arc,
    time::Duration,
};

/// Outcome of a [`crate::InstanceDnsProvider::private_dns_name`] call that did not produce a name.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("instance {0:?} not found")]
    NotFound(String),

    #[error("timed out after {after:?} waiting for instance {id:?}")]
    Timeout { id: String, after: Duration },

    #[error("lookup for instance {id:?} failed: {reason}")]
    LookupFailed { id: String, reason: Arc<str> },

    #[error("provider is shut down")]
    Shutdown,
}

/// Failure of a single remote lookup call.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("lookup api error: status={status}, body={body:?}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("lookup api throttled the request")]
    Throttled,

    #[error("failed to parse lookup response: {0}")]
    Parse(String),

    #[error("unable to read instances: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,

    #[error("wait timeout must be greater than zero")]
    ZeroWaitTimeout,
}
