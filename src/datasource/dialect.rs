//! SQL dialects reachable through a datasource URL

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
    Oracle,
}

impl Dialect {
    /// Infer the dialect from a URL scheme (an optional `jdbc:` prefix is ignored)
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = strip_jdbc_prefix(url.trim()).to_ascii_lowercase();
        let scheme = lower.split(':').next().unwrap_or_default();
        match scheme {
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            "sqlserver" | "mssql" => Some(Dialect::SqlServer),
            "oracle" => Some(Dialect::Oracle),
            _ => None,
        }
    }

    /// Map a driver name or driver class (`com.mysql.cj.jdbc.Driver`, `postgres`, ...)
    pub fn from_driver(driver: &str) -> Option<Self> {
        let lower = driver.to_ascii_lowercase();
        if lower.contains("mysql") || lower.contains("mariadb") {
            Some(Dialect::MySql)
        } else if lower.contains("postgres") {
            Some(Dialect::Postgres)
        } else if lower.contains("sqlite") {
            Some(Dialect::Sqlite)
        } else if lower.contains("sqlserver") || lower.contains("mssql") {
            Some(Dialect::SqlServer)
        } else if lower.contains("oracle") {
            Some(Dialect::Oracle)
        } else {
            None
        }
    }

    /// Whether a pool can be opened for this dialect
    pub fn is_supported(&self) -> bool {
        matches!(self, Dialect::MySql | Dialect::Postgres | Dialect::Sqlite)
    }

    /// Quote an identifier that has already been validated
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", identifier),
            Dialect::SqlServer => format!("[{}]", identifier),
            _ => format!("\"{}\"", identifier),
        }
    }

    /// Positional placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
            Dialect::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drop a leading `jdbc:` (any case)
pub(crate) fn strip_jdbc_prefix(url: &str) -> &str {
    match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &url[5..],
        _ => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_inference() {
        assert_eq!(Dialect::from_url("jdbc:mariadb://h:3306/d"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_url("JDBC:PostgreSQL://h:5432/d"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("jdbc:oracle:thin:@h:1521:orcl"), Some(Dialect::Oracle));
        assert_eq!(Dialect::from_url("h2:mem"), None);
    }

    #[test]
    fn quoting_and_placeholders() {
        assert_eq!(Dialect::MySql.quote("orders"), "`orders`");
        assert_eq!(Dialect::Postgres.quote("orders"), "\"orders\"");
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?");
        assert!(!Dialect::Oracle.is_supported());
    }

    #[test]
    fn jdbc_prefix_is_case_insensitive() {
        assert_eq!(strip_jdbc_prefix("JdBc:mysql://x"), "mysql://x");
        assert_eq!(strip_jdbc_prefix("mysql://x"), "mysql://x");
        assert_eq!(strip_jdbc_prefix("jdb"), "jdb");
    }
}
