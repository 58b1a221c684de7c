#[macro_use]
extern crate tracing;

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod lookup;
pub mod pending;
pub mod provider;
pub mod queue;
pub mod stats;

pub use config::ProviderConfig;
pub use error::{
    ConfigError,
    LookupError,
    ResolveError,
};
pub use provider::InstanceDnsProvider;
