//! Configuration loader and validator for the storefront service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub http: Http,
    pub telegram: Telegram,
    #[serde(default)]
    pub import: Import,
    #[serde(default)]
    pub outbox: Outbox,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Public base URL of this service; image candidates are built on it.
    pub public_url: String,
    /// URL of the mini-app opened from the bot's `/start` button.
    pub webapp_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Seeded into the `admins` table at startup.
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    /// Maximum age of `initData`; 0 disables the check.
    #[serde(default = "default_init_data_max_age")]
    pub init_data_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Import {
    pub batch_size: usize,
}

impl Default for Import {
    fn default() -> Self {
        Self { batch_size: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outbox {
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_backoff_seconds: 300,
        }
    }
}

fn default_currency() -> String {
    "₽".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_init_data_max_age() -> u64 {
    86_400
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and its `images/`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.images_dir())
    }

    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("images")
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/storefront.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if !is_http_url(&cfg.app.public_url) {
        return Err(ConfigError::Invalid("app.public_url must be an absolute http(s) URL"));
    }
    if !is_http_url(&cfg.app.webapp_url) {
        return Err(ConfigError::Invalid("app.webapp_url must be an absolute http(s) URL"));
    }
    if cfg.http.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("http.bind must be non-empty"));
    }
    if cfg.http.max_upload_bytes == 0 {
        return Err(ConfigError::Invalid("http.max_upload_bytes must be > 0"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.import.batch_size == 0 || cfg.import.batch_size > 1000 {
        return Err(ConfigError::Invalid("import.batch_size must be within 1..=1000"));
    }
    if cfg.outbox.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("outbox.poll_interval_ms must be > 0"));
    }
    Ok(())
}

/// Example configuration, kept in sync with `validate`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  public_url: "https://shop.example.com"
  webapp_url: "https://shop.example.com/app"
  currency: "₽"

http:
  bind: "0.0.0.0:8080"
  max_upload_bytes: 10485760

telegram:
  bot_token: "123456:TEST-TOKEN"
  admin_ids:
    - 123456789
  init_data_max_age_secs: 86400

import:
  batch_size: 200

outbox:
  poll_interval_ms: 500
  max_backoff_seconds: 300
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.telegram.admin_ids, vec![123456789]);
        assert_eq!(cfg.import.batch_size, 200);
    }

    #[test]
    fn optional_sections_default() {
        let raw = r#"app:
  data_dir: "./data"
  public_url: "https://shop.example.com"
  webapp_url: "https://shop.example.com/app"
http:
  bind: "127.0.0.1:8080"
telegram:
  bot_token: "t"
"#;
        let cfg: Config = serde_yaml::from_str(raw).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.currency, "₽");
        assert_eq!(cfg.outbox, Outbox::default());
        assert_eq!(cfg.telegram.init_data_max_age_secs, 86_400);
        assert!(cfg.telegram.admin_ids.is_empty());
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_urls() {
        let mut cfg = example_cfg();
        cfg.app.public_url = "/relative".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("public_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.app.webapp_url = "ftp://shop.example.com".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_batch_size() {
        let mut cfg = example_cfg();
        cfg.import.batch_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
        cfg.import.batch_size = 5000;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_images_dir() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(cfg.images_dir().exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }
}
