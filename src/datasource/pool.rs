//! Native sqlx pools, one variant per supported driver
//!
//! Each variant runs statements on its own driver so every column type the
//! driver understands can be decoded (see `decode`).

use crate::datasource::config::PoolSettings;
use crate::datasource::decode::{mysql_row, postgres_row, sqlite_row};
use crate::datasource::dialect::Dialect;
use crate::runtime::result::Payload;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlPool};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{Database, Encode, Type};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum DatasourcePool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DatasourcePool {
    /// Open a pool for `dialect`; fails for dialects without a driver
    pub(crate) async fn connect(
        dialect: Dialect,
        url: &str,
        settings: &PoolSettings,
    ) -> Result<Self, sqlx::Error> {
        match dialect {
            Dialect::MySql => Ok(DatasourcePool::MySql(options(settings).connect(url).await?)),
            Dialect::Postgres => Ok(DatasourcePool::Postgres(options(settings).connect(url).await?)),
            Dialect::Sqlite => Ok(DatasourcePool::Sqlite(options(settings).connect(url).await?)),
            other => Err(sqlx::Error::Configuration(
                format!("no driver available for {}", other).into(),
            )),
        }
    }

    pub(crate) fn dialect(&self) -> Dialect {
        match self {
            DatasourcePool::MySql(_) => Dialect::MySql,
            DatasourcePool::Postgres(_) => Dialect::Postgres,
            DatasourcePool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Liveness check run once after creation
    pub(crate) async fn ping(&self) -> Result<(), sqlx::Error> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }

    pub(crate) async fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Payload>, sqlx::Error> {
        match self {
            DatasourcePool::MySql(pool) => {
                let rows = bind_params(sqlx::query::<MySql>(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(mysql_row).collect())
            }
            DatasourcePool::Postgres(pool) => {
                let rows = bind_params(sqlx::query::<Postgres>(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(postgres_row).collect())
            }
            DatasourcePool::Sqlite(pool) => {
                let rows = bind_params(sqlx::query::<Sqlite>(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(sqlite_row).collect())
            }
        }
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
        let affected = match self {
            DatasourcePool::MySql(pool) => bind_params(sqlx::query::<MySql>(sql), params)
                .execute(pool)
                .await?
                .rows_affected(),
            DatasourcePool::Postgres(pool) => bind_params(sqlx::query::<Postgres>(sql), params)
                .execute(pool)
                .await?
                .rows_affected(),
            DatasourcePool::Sqlite(pool) => bind_params(sqlx::query::<Sqlite>(sql), params)
                .execute(pool)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    pub(crate) async fn close(&self) {
        match self {
            DatasourcePool::MySql(pool) => pool.close().await,
            DatasourcePool::Postgres(pool) => pool.close().await,
            DatasourcePool::Sqlite(pool) => pool.close().await,
        }
    }

    pub(crate) fn size(&self) -> u32 {
        match self {
            DatasourcePool::MySql(pool) => pool.size(),
            DatasourcePool::Postgres(pool) => pool.size(),
            DatasourcePool::Sqlite(pool) => pool.size(),
        }
    }

    pub(crate) fn num_idle(&self) -> usize {
        match self {
            DatasourcePool::MySql(pool) => pool.num_idle(),
            DatasourcePool::Postgres(pool) => pool.num_idle(),
            DatasourcePool::Sqlite(pool) => pool.num_idle(),
        }
    }
}

fn options<DB: Database>(settings: &PoolSettings) -> PoolOptions<DB> {
    let max_connections = settings.max_pool_size.max(1);
    PoolOptions::<DB>::new()
        .max_connections(max_connections)
        .min_connections(settings.min_pool_size.min(max_connections))
        .acquire_timeout(Duration::from_millis(settings.connection_timeout))
        .idle_timeout(Some(Duration::from_millis(settings.idle_timeout)))
        .max_lifetime(Some(Duration::from_millis(settings.max_lifetime)))
}

/// Bind JSON values positionally: null, bool, integer, float and string map
/// onto native types; arrays and objects are bound as their JSON text
fn bind_params<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    params: &[Value],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB>,
{
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> PoolSettings {
        PoolSettings {
            max_pool_size: 1,
            ..PoolSettings::default()
        }
    }

    #[tokio::test]
    async fn sqlite_binds_every_json_scalar() {
        let pool = DatasourcePool::connect(Dialect::Sqlite, "sqlite::memory:", &settings())
            .await
            .unwrap();
        assert_eq!(pool.dialect(), Dialect::Sqlite);
        pool.ping().await.unwrap();

        pool.execute("CREATE TABLE t (i INTEGER, f REAL, s TEXT, b INTEGER, j TEXT, n TEXT)", &[])
            .await
            .unwrap();
        let inserted = pool
            .execute(
                "INSERT INTO t VALUES (?, ?, ?, ?, ?, ?)",
                &[json!(3), json!(1.5), json!("x"), json!(true), json!({"k": [1]}), Value::Null],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = pool.fetch_rows("SELECT * FROM t WHERE i = ?", &[json!(3)]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["f"], json!(1.5));
        assert_eq!(rows[0]["s"], json!("x"));
        assert_eq!(rows[0]["b"], json!(1));
        assert_eq!(rows[0]["j"], json!(r#"{"k":[1]}"#));
        assert_eq!(rows[0]["n"], Value::Null);

        pool.close().await;
        assert!(pool.ping().await.is_err());
    }

    #[tokio::test]
    async fn dialects_without_a_driver_are_refused() {
        let err = DatasourcePool::connect(Dialect::Oracle, "oracle:thin:@h:1521:db", &settings())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }
}
