//! Per-node datasource configuration
//!
//! A datasource arrives as an open key/value map, usually the `datasource`
//! parameter of an operator template. Only `url` is mandatory here; the
//! username check happens at pool creation so its error can name the pool key.

use crate::datasource::dialect::Dialect;
use crate::error::ChoreoError;
use crate::runtime::result::Payload;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
pub const DEFAULT_MIN_POOL_SIZE: u32 = 1;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;
pub const DEFAULT_LEAK_DETECTION_THRESHOLD_MS: u64 = 60_000;

/// Pool sizing and timing, all in milliseconds where applicable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
    /// Recorded and reported only; sqlx pools have no leak detector
    pub leak_detection_threshold: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_MS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime: DEFAULT_MAX_LIFETIME_MS,
            leak_detection_threshold: DEFAULT_LEAK_DETECTION_THRESHOLD_MS,
        }
    }
}

/// Parsed datasource configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatasourceConfig {
    pub url: String,
    /// Explicit driver name (`driver` or `driver-class-name`)
    pub driver: Option<String>,
    pub username: Option<String>,
    pub password: String,
    pub settings: PoolSettings,
}

impl DatasourceConfig {
    /// Minimal configuration with default pool settings
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            driver: None,
            username: Some(username.into()),
            password: String::new(),
            settings: PoolSettings::default(),
        }
    }

    /// Parse a configuration map; fails only when `url` is absent or blank
    pub fn from_map(map: &Payload) -> Result<Self, ChoreoError> {
        let url = string_field(map, "url").ok_or(ChoreoError::MissingUrl)?;

        let driver = string_field(map, "driver").or_else(|| string_field(map, "driver-class-name"));

        let defaults = PoolSettings::default();
        let settings = PoolSettings {
            max_pool_size: int_field(map, "maxPoolSize", defaults.max_pool_size as u64) as u32,
            min_pool_size: int_field(map, "minPoolSize", defaults.min_pool_size as u64) as u32,
            connection_timeout: int_field(map, "connectionTimeout", defaults.connection_timeout),
            idle_timeout: int_field(map, "idleTimeout", defaults.idle_timeout),
            max_lifetime: int_field(map, "maxLifetime", defaults.max_lifetime),
            leak_detection_threshold: int_field(
                map,
                "leakDetectionThreshold",
                defaults.leak_detection_threshold,
            ),
        };

        Ok(Self {
            url,
            driver,
            username: string_field(map, "username"),
            password: map
                .get("password")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            settings,
        })
    }

    /// Parse a configuration given either as a JSON object or as JSON text
    pub fn from_value(value: &Value) -> Result<Self, ChoreoError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Self::from_map(&map),
                Ok(_) => Err(ChoreoError::InvalidDatasource(
                    "datasource text must encode a JSON object".into(),
                )),
                Err(e) => Err(ChoreoError::InvalidDatasource(format!(
                    "datasource text is not valid JSON: {}",
                    e
                ))),
            },
            other => Err(ChoreoError::InvalidDatasource(format!(
                "expected an object or JSON text, got {}",
                value_kind(other)
            ))),
        }
    }

    /// Dialect from the explicit driver, else from the URL scheme, else MySQL
    pub fn dialect(&self) -> Result<Dialect, ChoreoError> {
        match &self.driver {
            Some(driver) => Dialect::from_driver(driver)
                .ok_or_else(|| ChoreoError::UnsupportedDriver(driver.clone())),
            None => Ok(Dialect::from_url(&self.url).unwrap_or(Dialect::MySql)),
        }
    }
}

fn string_field(map: &Payload, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers or numeric strings; anything else yields the default with a warning
fn int_field(map: &Payload, key: &str, default: u64) -> u64 {
    let Some(value) = map.get(key) else {
        return default;
    };

    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        tracing::warn!(
            "⚠️ Unparseable datasource setting {}={}, using default {}",
            key,
            value,
            default
        );
        default
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_or_blank_url_is_rejected() {
        let err = DatasourceConfig::from_map(&map(json!({"username": "u"}))).unwrap_err();
        assert_eq!(err.kind(), "MissingUrl");

        let err = DatasourceConfig::from_map(&map(json!({"url": "   "}))).unwrap_err();
        assert_eq!(err.kind(), "MissingUrl");
    }

    #[test]
    fn defaults_apply() {
        let config = DatasourceConfig::from_map(&map(json!({
            "url": "jdbc:mysql://db:3306/shop"
        })))
        .unwrap();

        assert_eq!(config.settings, PoolSettings::default());
        assert_eq!(config.password, "");
        assert_eq!(config.username, None);
        assert_eq!(config.settings.max_pool_size, 10);
        assert_eq!(config.settings.leak_detection_threshold, 60_000);
    }

    #[test]
    fn numeric_fields_accept_strings_and_fall_back_on_garbage() {
        let config = DatasourceConfig::from_map(&map(json!({
            "url": "jdbc:mysql://db:3306/shop",
            "maxPoolSize": "25",
            "minPoolSize": 3,
            "connectionTimeout": "soon",
            "idleTimeout": true
        })))
        .unwrap();

        assert_eq!(config.settings.max_pool_size, 25);
        assert_eq!(config.settings.min_pool_size, 3);
        assert_eq!(config.settings.connection_timeout, DEFAULT_CONNECTION_TIMEOUT_MS);
        assert_eq!(config.settings.idle_timeout, DEFAULT_IDLE_TIMEOUT_MS);
    }

    #[test]
    fn driver_key_aliases_and_dialect_resolution() {
        let config = DatasourceConfig::from_map(&map(json!({
            "url": "jdbc:mysql://db:3306/shop",
            "driver-class-name": "org.postgresql.Driver"
        })))
        .unwrap();
        assert_eq!(config.dialect().unwrap(), Dialect::Postgres);

        let inferred = DatasourceConfig::new("postgresql://db:5432/shop", "u");
        assert_eq!(inferred.dialect().unwrap(), Dialect::Postgres);

        let fallback = DatasourceConfig::new("something-odd", "u");
        assert_eq!(fallback.dialect().unwrap(), Dialect::MySql);

        let mut unknown = DatasourceConfig::new("jdbc:mysql://db:3306/shop", "u");
        unknown.driver = Some("com.example.Unknown".into());
        assert_eq!(unknown.dialect().unwrap_err().kind(), "UnsupportedDriver");
    }

    #[test]
    fn from_value_accepts_object_or_json_text() {
        let text = json!(r#"{"url": "jdbc:mysql://db:3306/shop", "username": "app"}"#);
        let config = DatasourceConfig::from_value(&text).unwrap();
        assert_eq!(config.username.as_deref(), Some("app"));

        assert_eq!(
            DatasourceConfig::from_value(&json!("not json")).unwrap_err().kind(),
            "InvalidDatasource"
        );
        assert_eq!(
            DatasourceConfig::from_value(&json!(42)).unwrap_err().kind(),
            "InvalidDatasource"
        );
    }
}
