//! tidepool.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidepoolConfig {
    pub datasource: DataSourceConfig,
    pub pool: Option<PoolSection>,
    pub cache: Option<CacheSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auto_commit: Option<bool>,
    pub properties: Option<BTreeMap<String, String>>,
}

/// Pool sizing and liveness-probe options. Durations are strings such as
/// `"500ms"`, `"20s"` or `"1m"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSection {
    pub max_active: Option<usize>,
    pub max_idle: Option<usize>,
    pub max_checkout_time: Option<String>,
    pub time_to_wait: Option<String>,
    pub bad_connection_tolerance: Option<usize>,
    pub ping_enabled: Option<bool>,
    pub ping_query: Option<String>,
    pub ping_connections_not_used_for: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub blocking: Option<bool>,
    pub blocking_timeout: Option<String>,
    pub retention_size: Option<usize>,
    pub max_entries: Option<usize>,
    pub memory_budget: Option<usize>,
}

impl TidepoolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: TidepoolConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal tidepool.toml for the given endpoint.
    pub fn scaffold(url: &str, username: &str) -> Self {
        TidepoolConfig {
            datasource: DataSourceConfig {
                url: url.to_string(),
                username: Some(username.to_string()),
                password: None,
                auto_commit: Some(false),
                properties: None,
            },
            pool: Some(PoolSection {
                max_active: Some(10),
                max_idle: Some(5),
                max_checkout_time: Some("20s".to_string()),
                time_to_wait: Some("20s".to_string()),
                bad_connection_tolerance: Some(3),
                ping_enabled: Some(false),
                ping_query: None,
                ping_connections_not_used_for: None,
            }),
            cache: Some(CacheSection {
                blocking: Some(true),
                blocking_timeout: None,
                retention_size: Some(256),
                max_entries: Some(1024),
                memory_budget: Some(4 * 1024 * 1024),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scaffold() {
        let config = TidepoolConfig::scaffold("postgres://db.local:5432/app", "app");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("postgres://db.local:5432/app"));
        assert!(toml_str.contains("max_active = 10"));
        assert!(toml_str.contains("memory_budget = 4194304"));
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[datasource]
url = "postgres://localhost/test"
"#;
        let config = TidepoolConfig::parse(toml_str).unwrap();
        assert_eq!(config.datasource.url, "postgres://localhost/test");
        assert!(config.pool.is_none());
        assert!(config.cache.is_none());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[datasource]
url = "mysql://db:3306/shop"
username = "shop"
password = "hunter2"
auto_commit = false

[datasource.properties]
application_name = "tidepool"

[pool]
max_active = 4
max_idle = 2
max_checkout_time = "500ms"
ping_enabled = true
ping_query = "SELECT 1"

[cache]
blocking_timeout = "50ms"
retention_size = 2
"#;
        let config = TidepoolConfig::parse(toml_str).unwrap();
        let pool = config.pool.unwrap();
        assert_eq!(pool.max_active, Some(4));
        assert_eq!(pool.max_checkout_time.as_deref(), Some("500ms"));
        assert_eq!(pool.ping_query.as_deref(), Some("SELECT 1"));
        assert_eq!(config.cache.unwrap().retention_size, Some(2));
        assert_eq!(
            config.datasource.properties.unwrap()["application_name"],
            "tidepool"
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[datasource]\nurl = \"postgres://file/db\"").unwrap();
        let config = TidepoolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.datasource.url, "postgres://file/db");
    }

    #[test]
    fn test_missing_datasource_is_error() {
        assert!(TidepoolConfig::parse("[pool]\nmax_active = 1\n").is_err());
    }
}
