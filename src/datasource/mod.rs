//! Dynamic datasource access
//!
//! Nodes that talk to a database carry their own datasource configuration.
//! `PoolManager` turns each configuration into a cached pool keyed by
//! `host:port:database` and hands out per-call `QueryHandle`s bound to it.

pub mod config;

pub mod decode;

pub mod dialect;

pub mod handle;

pub mod manager;

pub mod pool;

pub mod url;

pub use config::{DatasourceConfig, PoolSettings};
pub use dialect::Dialect;
pub use handle::QueryHandle;
pub use manager::{CacheInfo, PoolInfo, PoolManager};
pub use url::cache_key;
