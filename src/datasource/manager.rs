//! Per-database connection pool cache
//!
//! Every distinct `host:port:database` gets at most one native sqlx pool.
//! Lookups go through a read lock first; a miss takes the write lock only
//! long enough to insert an empty per-key cell, and the pool itself is built
//! inside that cell. Creating pools for two different databases therefore
//! never waits on one global lock, while racing creators for the same key
//! share one pool.

use crate::datasource::config::{DatasourceConfig, PoolSettings};
use crate::datasource::dialect::{strip_jdbc_prefix, Dialect};
use crate::datasource::handle::QueryHandle;
use crate::datasource::pool::DatasourcePool;
use crate::datasource::url::cache_key;
use crate::error::ChoreoError;
use crate::runtime::result::Payload;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Rounds `query_handle` makes when a clear keeps racing pool creation
const MAX_CREATE_ROUNDS: usize = 3;

#[derive(Debug, Clone)]
struct CachedPool {
    pool: DatasourcePool,
    settings: PoolSettings,
}

type PoolCell = Arc<OnceCell<CachedPool>>;

/// Snapshot of the pool cache for monitoring
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub size: usize,
    pub keys: Vec<String>,
    pub pools: Vec<PoolInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub key: String,
    pub dialect: Dialect,
    pub settings: PoolSettings,
    pub connections: u32,
    pub idle_connections: usize,
}

/// Owner of every dynamically created datasource pool
///
/// Call `shutdown` to close pools gracefully. Dropping the manager only drops
/// its pool handles; sqlx closes a pool once its last handle is gone.
#[derive(Debug, Default)]
pub struct PoolManager {
    pools: RwLock<HashMap<String, PoolCell>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh query handle bound to the pool for `config`
    ///
    /// Creates the pool on first use of its key. Creation failures are not
    /// cached; the next call for the same key tries again.
    pub async fn query_handle(&self, config: &DatasourceConfig) -> Result<QueryHandle, ChoreoError> {
        if config.url.trim().is_empty() {
            return Err(ChoreoError::MissingUrl);
        }

        let key = cache_key(&config.url);

        for _ in 0..MAX_CREATE_ROUNDS {
            let cell = self.cell_for(&key).await;

            let cached = match cell.get_or_try_init(|| create_pool(&key, config)).await {
                Ok(cached) => cached,
                Err(err) => {
                    self.evict_empty(&key, &cell).await;
                    return Err(err);
                }
            };

            if self.still_cached(&key, &cell).await {
                return Ok(QueryHandle::new(cached.pool.clone(), key));
            }

            // The cell was cleared while its pool was being built
            tracing::warn!("⚠️ Pool {} was cleared during creation, retrying", key);
            cached.pool.close().await;
        }

        Err(ChoreoError::PoolCreation {
            cache_key: key,
            source: sqlx::Error::PoolClosed,
        })
    }

    /// Parse `config` from a map and hand out a query handle
    pub async fn query_handle_from_map(
        &self,
        config: &Payload,
    ) -> Result<QueryHandle, ChoreoError> {
        let config = DatasourceConfig::from_map(config)?;
        self.query_handle(&config).await
    }

    async fn cell_for(&self, key: &str) -> PoolCell {
        // Fast path: cell already present
        {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(key) {
                if cell.initialized() {
                    tracing::debug!("♻️ Reusing pool {}", key);
                }
                return Arc::clone(cell);
            }
        }

        let mut pools = self.pools.write().await;
        Arc::clone(pools.entry(key.to_string()).or_default())
    }

    async fn still_cached(&self, key: &str, cell: &PoolCell) -> bool {
        let pools = self.pools.read().await;
        pools.get(key).is_some_and(|current| Arc::ptr_eq(current, cell))
    }

    /// Drop `cell` from the map if creation inside it failed
    async fn evict_empty(&self, key: &str, cell: &PoolCell) {
        let mut pools = self.pools.write().await;
        let failed = pools
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if failed {
            pools.remove(key);
        }
    }

    /// Keys and settings of every live pool
    pub async fn cache_info(&self) -> CacheInfo {
        let pools = self.pools.read().await;

        let mut infos: Vec<PoolInfo> = pools
            .iter()
            .filter_map(|(key, cell)| {
                cell.get().map(|cached| PoolInfo {
                    key: key.clone(),
                    dialect: cached.pool.dialect(),
                    settings: cached.settings,
                    connections: cached.pool.size(),
                    idle_connections: cached.pool.num_idle(),
                })
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));

        CacheInfo {
            size: infos.len(),
            keys: infos.iter().map(|info| info.key.clone()).collect(),
            pools: infos,
        }
    }

    /// Close and forget every pool
    pub async fn clear_cache(&self) {
        let drained: Vec<(String, PoolCell)> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        let mut closed = 0;
        for (key, cell) in drained {
            if let Some(cached) = cell.get() {
                cached.pool.close().await;
                tracing::debug!("Closed pool {}", key);
                closed += 1;
            }
        }

        tracing::info!("🧹 Cleared pool cache ({} pools closed)", closed);
    }

    /// Close and forget the pool under `key`; false when no such pool exists
    pub async fn clear_cache_by_key(&self, key: &str) -> bool {
        let removed = {
            let mut pools = self.pools.write().await;
            pools.remove(key)
        };

        match removed.as_ref().and_then(|cell| cell.get()) {
            Some(cached) => {
                cached.pool.close().await;
                tracing::info!("🧹 Closed pool {}", key);
                true
            }
            None => false,
        }
    }

    /// Release every pool; call once before process exit
    pub async fn shutdown(&self) {
        tracing::info!("🛑 Shutting down pool manager");
        self.clear_cache().await;
    }
}

async fn create_pool(key: &str, config: &DatasourceConfig) -> Result<CachedPool, ChoreoError> {
    let username = config
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ChoreoError::MissingUsername {
            cache_key: key.to_string(),
        })?;

    let dialect = config.dialect()?;
    if !dialect.is_supported() {
        return Err(ChoreoError::UnsupportedDriver(dialect.to_string()));
    }

    let url = connection_url(config, dialect, username)?;
    let settings = config.settings;
    let max_connections = settings.max_pool_size.max(1);

    tracing::info!(
        "🗄️ Creating pool DynamicPool-{} ({}, max {}, min {})",
        key,
        dialect,
        max_connections,
        settings.min_pool_size.min(max_connections)
    );

    let pool = DatasourcePool::connect(dialect, &url, &settings)
        .await
        .map_err(|source| {
            tracing::error!("❌ Pool creation failed for {}: {}", key, source);
            ChoreoError::PoolCreation {
                cache_key: key.to_string(),
                source,
            }
        })?;

    if let Err(source) = pool.ping().await {
        tracing::error!("❌ Liveness check failed for {}: {}", key, source);
        pool.close().await;
        return Err(ChoreoError::PoolCreation {
            cache_key: key.to_string(),
            source,
        });
    }

    tracing::info!("✅ Pool DynamicPool-{} ready", key);

    Ok(CachedPool { pool, settings })
}

/// Turn a configured URL into one sqlx can open
///
/// Strips `jdbc:`, maps MariaDB onto the MySQL driver, and carries the
/// credentials inside the URL (SQLite has none).
fn connection_url(
    config: &DatasourceConfig,
    dialect: Dialect,
    username: &str,
) -> Result<String, ChoreoError> {
    let raw = strip_jdbc_prefix(config.url.trim());

    let raw = match raw.get(..10) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mariadb://") => format!("mysql://{}", &raw[10..]),
        _ => raw.to_string(),
    };

    if dialect == Dialect::Sqlite {
        return Ok(raw);
    }

    let mut url = url::Url::parse(&raw)
        .map_err(|e| ChoreoError::InvalidDatasource(format!("unparseable url: {}", e)))?;

    url.set_username(username)
        .map_err(|_| ChoreoError::InvalidDatasource("url cannot carry a username".into()))?;
    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|_| ChoreoError::InvalidDatasource("url cannot carry a password".into()))?;
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sqlite_config() -> DatasourceConfig {
        let mut config = DatasourceConfig::new("sqlite::memory:", "sa");
        config.settings.max_pool_size = 1;
        config
    }

    #[test]
    fn connection_url_injects_credentials() {
        let mut config = DatasourceConfig::new("jdbc:mariadb://db:3306/shop?useSSL=false", "app");
        config.password = "s3cret".into();

        let url = connection_url(&config, Dialect::MySql, "app").unwrap();
        assert_eq!(url, "mysql://app:s3cret@db:3306/shop?useSSL=false");
    }

    #[test]
    fn connection_url_leaves_sqlite_alone() {
        let config = sqlite_config();
        assert_eq!(
            connection_url(&config, Dialect::Sqlite, "sa").unwrap(),
            "sqlite::memory:"
        );
    }

    #[tokio::test]
    async fn missing_username_names_the_key() {
        let manager = PoolManager::new();
        let mut config = DatasourceConfig::new("jdbc:mysql://db:3306/shop", "");
        config.username = None;

        let err = manager.query_handle(&config).await.unwrap_err();
        match err {
            ChoreoError::MissingUsername { cache_key } => assert_eq!(cache_key, "db:3306:shop"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.cache_info().await.size, 0);
    }

    #[tokio::test]
    async fn unsupported_dialects_fail_after_keying() {
        let manager = PoolManager::new();
        let config = DatasourceConfig::new("jdbc:oracle:thin:@ora:1521:orcl", "scott");

        let err = manager.query_handle(&config).await.unwrap_err();
        assert_eq!(err.kind(), "UnsupportedDriver");
    }

    #[tokio::test]
    async fn missing_url_from_map() {
        let manager = PoolManager::new();
        let config = json!({"username": "sa"}).as_object().cloned().unwrap();

        let err = manager.query_handle_from_map(&config).await.unwrap_err();
        assert_eq!(err.kind(), "MissingUrl");
    }

    #[tokio::test]
    async fn sqlite_pool_is_cached_and_handles_are_fresh() {
        let manager = PoolManager::new();
        let config = sqlite_config();

        let first = manager.query_handle(&config).await.unwrap();
        let second = manager.query_handle(&config).await.unwrap();
        assert_eq!(first.cache_key(), second.cache_key());
        assert_eq!(first.dialect(), Dialect::Sqlite);

        let info = manager.cache_info().await;
        assert_eq!(info.size, 1);
        assert_eq!(info.keys, vec![first.cache_key().to_string()]);
        assert_eq!(info.pools[0].settings.leak_detection_threshold, 60_000);

        first
            .update("CREATE TABLE items (id INTEGER, label TEXT)", &[])
            .await
            .unwrap();
        let inserted = second
            .update(
                "INSERT INTO items (id, label) VALUES (?, ?)",
                &[json!(7), json!("seven")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = first
            .query_for_list("SELECT id, label FROM items WHERE id = ?", &[json!(7)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("label"), Some(&json!("seven")));
        assert_eq!(rows[0].get("id"), Some(&json!(7)));

        let key = first.cache_key().to_string();
        assert!(manager.clear_cache_by_key(&key).await);
        assert!(!manager.clear_cache_by_key(&key).await);
        assert_eq!(manager.cache_info().await.size, 0);
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_one_pool() {
        let manager = Arc::new(PoolManager::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.query_handle(&sqlite_config()).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        let info = manager.cache_info().await;
        assert_eq!(info.size, 1);
        assert!(handles.iter().all(|h| h.cache_key() == info.keys[0]));

        // One in-memory database behind every handle
        handles[0].update("CREATE TABLE seen (n INTEGER)", &[]).await.unwrap();
        for (n, handle) in handles.iter().enumerate() {
            handle.update("INSERT INTO seen VALUES (?)", &[json!(n)]).await.unwrap();
        }
        let rows = handles[15]
            .query_for_list("SELECT COUNT(*) AS total FROM seen", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["total"], json!(16));
    }

    #[tokio::test]
    async fn query_parameters_share_a_pool_and_databases_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let orders = dir.path().join("orders.db");
        let stock = dir.path().join("stock.db");
        let manager = PoolManager::new();

        let plain = DatasourceConfig::new(format!("sqlite://{}?mode=rwc", orders.display()), "sa");
        let tuned = DatasourceConfig::new(
            format!("sqlite://{}?mode=rwc&cache=private", orders.display()),
            "sa",
        );
        let other = DatasourceConfig::new(format!("sqlite://{}?mode=rwc", stock.display()), "sa");

        let first = manager.query_handle(&plain).await.unwrap();
        first.update("CREATE TABLE marker (id INTEGER)", &[]).await.unwrap();

        let same = manager.query_handle(&tuned).await.unwrap();
        assert_eq!(same.cache_key(), first.cache_key());
        assert_eq!(manager.cache_info().await.size, 1);
        assert!(same.query_for_list("SELECT id FROM marker", &[]).await.is_ok());

        let different = manager.query_handle(&other).await.unwrap();
        assert_ne!(different.cache_key(), first.cache_key());
        assert_eq!(manager.cache_info().await.size, 2);
        assert!(different.query_for_list("SELECT id FROM marker", &[]).await.is_err());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_cell_behind() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent").join("gone.db");
        let manager = PoolManager::new();
        let config = DatasourceConfig::new(format!("sqlite://{}?mode=ro", missing.display()), "sa");

        let err = manager.query_handle(&config).await.unwrap_err();
        assert_eq!(err.kind(), "PoolCreation");
        assert!(manager.pools.read().await.is_empty());
    }

    #[tokio::test]
    async fn cells_cleared_mid_creation_are_not_current() {
        let manager = PoolManager::new();
        let config = sqlite_config();
        let key = cache_key(&config.url);

        // A creator that finished after its cell was cleared
        let orphan = manager.cell_for(&key).await;
        manager.clear_cache().await;
        let built = orphan
            .get_or_try_init(|| create_pool(&key, &config))
            .await
            .unwrap();
        assert!(!manager.still_cached(&key, &orphan).await);

        let handle = manager.query_handle(&config).await.unwrap();
        assert_eq!(manager.cache_info().await.size, 1);
        assert!(handle.update("SELECT 1", &[]).await.is_ok());

        built.pool.close().await;
        assert!(built.pool.ping().await.is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn clearing_an_unknown_key_is_false() {
        let manager = PoolManager::new();
        assert!(!manager.clear_cache_by_key("nowhere:1:db").await);
        manager.shutdown().await;
    }
}
