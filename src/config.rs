use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path};

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "redis_addr_default")]
    pub redis_addr: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    /// Namespace in front of every stored counter key
    #[serde(default = "key_prefix_default")]
    pub key_prefix: String,
    #[serde(default = "response_timeout_ms_default")]
    pub response_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_addr: redis_addr_default(),
            log_level: log_level_default(),
            key_prefix: key_prefix_default(),
            response_timeout_ms: response_timeout_ms_default(),
        }
    }
}

impl Config {
    fn get_config_dir() -> anyhow::Result<path::PathBuf> {
        let config_dir = if let Ok(xdg_path) = env::var("XDG_CONFIG_HOME") {
            path::PathBuf::from(&xdg_path)
        } else {
            let home = env::var("HOME").with_context(|| "neither XDG_CONFIG_HOME nor HOME is set")?;
            path::Path::new(&home).join(".config")
        };

        Ok(config_dir.join("pageview"))
    }

    fn file_path() -> anyhow::Result<path::PathBuf> {
        if let Ok(cfg_path) = env::var("PAGEVIEW_CFG_PATH") {
            return Ok(path::PathBuf::from(cfg_path));
        }

        Ok(Self::get_config_dir()
            .with_context(|| "fail to locate config directory")?
            .join("config.toml"))
    }

    pub fn from_path() -> anyhow::Result<Self> {
        Self::from_file(Self::file_path()?)
    }

    pub fn from_file(file_path: impl AsRef<path::Path>) -> anyhow::Result<Self> {
        let file_path = file_path.as_ref();
        if !file_path.exists() {
            anyhow::bail!("Config file not found in {file_path:?}");
        }
        let content = fs::read_to_string(file_path).with_context(|| "fail to read config file")?;

        toml::from_str(&content).with_context(|| "fail to parse config from toml")
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn tracing_level(&self) -> anyhow::Result<tracing::Level> {
        self.log_level
            .parse()
            .with_context(|| format!("invalid log level `{}`", self.log_level))
    }
}

fn redis_addr_default() -> String {
    "redis://localhost:6379".to_string()
}

fn log_level_default() -> String {
    "INFO".to_string()
}

fn key_prefix_default() -> String {
    "page-counter".to_string()
}

fn response_timeout_ms_default() -> u64 {
    500
}

#[test]
fn validate_file_correctness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let config = r#"
        redis_addr = "redis://cache.internal:6380"
        log_level = "DEBUG"
        key_prefix = "blog-views"
        response_timeout_ms = 250
    "#;
    fs::write(&path, config).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.redis_addr, "redis://cache.internal:6380");
    assert_eq!(config.key_prefix, "blog-views");
    assert_eq!(config.response_timeout(), Duration::from_millis(250));
    assert_eq!(config.tracing_level().unwrap(), tracing::Level::DEBUG);
}

#[test]
fn missing_fields_use_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "").unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.redis_addr, "redis://localhost:6379");
    assert_eq!(config.key_prefix, "page-counter");
    assert_eq!(config.response_timeout_ms, 500);
    assert_eq!(config.tracing_level().unwrap(), tracing::Level::INFO);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(dir.path().join("nope.toml")).is_err());
}
