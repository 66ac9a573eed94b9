//! Per-call query handle bound to a cached pool

use crate::datasource::dialect::Dialect;
use crate::datasource::pool::DatasourcePool;
use crate::runtime::result::Payload;
use anyhow::Result;
use serde_json::Value;

/// Lightweight executor for one operator call
///
/// Handles are created fresh on every `PoolManager::query_handle` call and
/// never cached; only the pool behind them is shared.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    pool: DatasourcePool,
    cache_key: String,
}

impl QueryHandle {
    pub(crate) fn new(pool: DatasourcePool, cache_key: String) -> Self {
        Self { pool, cache_key }
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Key of the pool this handle runs on
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Run a query and return every row as an ordered column -> value map
    pub async fn query_for_list(&self, sql: &str, params: &[Value]) -> Result<Vec<Payload>> {
        tracing::debug!("🔍 [{}] {} {:?}", self.cache_key, sql, params);

        self.pool
            .fetch_rows(sql, params)
            .await
            .map_err(|e| anyhow::anyhow!("Query failed: {}", e))
    }

    /// Run a statement and return the number of affected rows
    pub async fn update(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!("✏️ [{}] {} {:?}", self.cache_key, sql, params);

        self.pool
            .execute(sql, params)
            .await
            .map_err(|e| anyhow::anyhow!("Statement failed: {}", e))
    }
}
