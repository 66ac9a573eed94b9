//! Pool cache keys derived from datasource URLs
//!
//! Two URLs that point at the same `host:port/database` share a pool, no
//! matter how their query parameters differ. URLs that fit none of the known
//! shapes still get a stable key: `url_hash_<hex>` of the raw URL.
//! SQLite URLs name a file rather than a server and key as
//! `localhost:sqlite:<path>`.

use crate::error::ChoreoError;
use regex::{Regex, RegexBuilder};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::LazyLock;

/// Host, port and database extracted from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlLocation {
    pub host: String,
    pub port: String,
    pub database: String,
}

impl UrlLocation {
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.database)
    }
}

// Tried in order; every pattern captures host, port and (optionally) database
const URL_PATTERNS: [&str; 3] = [
    r"^(?:jdbc:)?(?:mysql|mariadb|postgres|postgresql)://(?:[^@/]+@)?([^:/?;&@]+):(\d+)/([^?;&/]+)(?:[?;&].*)?$",
    r"^(?:jdbc:)?sqlserver://([^:/;]+):(\d+)(?:;.*?databaseName=([^;]+))?(?:;.*)?$",
    r"^(?:jdbc:)?oracle:thin:@([^:/]+):(\d+):([^?;&]+)(?:[?;&].*)?$",
];

const SQLITE_PATTERN: &str = r"^sqlite:(?://)?([^?]+)(?:\?.*)?$";

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    URL_PATTERNS
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect()
});

static SQLITE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new(SQLITE_PATTERN)
        .case_insensitive(true)
        .build()
        .ok()
});

/// Extract the pool location from a URL
pub fn parse_location(url: &str) -> Result<UrlLocation, ChoreoError> {
    let url = url.trim();
    let server = PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .map(|caps| UrlLocation {
            host: caps[1].to_string(),
            port: caps[2].to_string(),
            database: caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "default".to_string()),
        });

    server
        .or_else(|| {
            SQLITE.as_ref().and_then(|re| re.captures(url)).map(|caps| UrlLocation {
                host: "localhost".to_string(),
                port: "sqlite".to_string(),
                database: caps[1].to_string(),
            })
        })
        .ok_or_else(|| ChoreoError::UnresolvableUrl(url.to_string()))
}

/// Pool cache key for a URL; unparseable URLs degrade to a hashed key
pub fn cache_key(url: &str) -> String {
    match parse_location(url) {
        Ok(location) => location.cache_key(),
        Err(err) => {
            let key = hashed_key(url);
            tracing::warn!("⚠️ {}; falling back to key {}", err, key);
            key
        }
    }
}

fn hashed_key(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!("url_hash_{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        assert_eq!(PATTERNS.len(), URL_PATTERNS.len());
        assert!(SQLITE.is_some());
    }

    #[test]
    fn mysql_and_postgres_keys() {
        assert_eq!(
            cache_key("jdbc:mysql://db.local:3306/shop?useSSL=false"),
            "db.local:3306:shop"
        );
        assert_eq!(cache_key("postgresql://app@pg:5432/ledger"), "pg:5432:ledger");
        assert_eq!(cache_key("JDBC:MARIADB://m:3307/x;foo=bar"), "m:3307:x");
    }

    #[test]
    fn query_parameters_do_not_change_the_key() {
        let a = cache_key("jdbc:mysql://h:3306/d?useSSL=false");
        let b = cache_key("jdbc:mysql://h:3306/d?serverTimezone=UTC&characterEncoding=utf8");
        assert_eq!(a, b);
        assert_ne!(a, cache_key("jdbc:mysql://h:3306/other"));
    }

    #[test]
    fn sqlserver_database_defaults() {
        assert_eq!(
            cache_key("jdbc:sqlserver://sql:1433;encrypt=true;databaseName=erp"),
            "sql:1433:erp"
        );
        assert_eq!(cache_key("jdbc:sqlserver://sql:1433"), "sql:1433:default");
    }

    #[test]
    fn oracle_thin() {
        assert_eq!(cache_key("jdbc:oracle:thin:@ora:1521:orcl"), "ora:1521:orcl");
    }

    #[test]
    fn sqlite_keys_by_path() {
        assert_eq!(cache_key("sqlite::memory:"), "localhost:sqlite::memory:");
        assert_eq!(
            cache_key("sqlite:///var/data/app.db?mode=rwc"),
            cache_key("sqlite:///var/data/app.db?mode=ro&cache=shared")
        );
        assert_eq!(cache_key("sqlite://data.db"), "localhost:sqlite:data.db");
        assert_ne!(cache_key("sqlite://data.db"), cache_key("sqlite://other.db"));
    }

    #[test]
    fn unknown_shapes_hash_stably() {
        let err = parse_location("h2:mem:testdb").unwrap_err();
        assert_eq!(err.kind(), "UnresolvableUrl");

        let first = cache_key("h2:mem:testdb");
        assert!(first.starts_with("url_hash_"));
        assert_eq!(first, cache_key("h2:mem:testdb"));
        assert_ne!(first, cache_key("h2:mem:otherdb"));
    }
}
