//! Configuration loader and validator for the Xero archiver.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub xero: Xero,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default = "default_run_deadline")]
    pub run_deadline_seconds: u64,
    #[serde(default = "default_item_timeout")]
    pub item_timeout_seconds: u64,
}

/// Xero OAuth2 application and API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Xero {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_identity_base")]
    pub identity_base: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Per-endpoint pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoints {
    pub invoices: Paged,
    pub expenses: Single,
    pub receipts: Paged,
    pub bills: Paged,
}

/// A paginated endpoint: where its files land, how far back to look and how
/// many pages to request at most.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paged {
    pub dir: String,
    pub floor: NaiveDate,
    pub max_pages: u32,
}

/// An endpoint served by a single list call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Single {
    pub floor: NaiveDate,
}

fn default_session() -> String {
    "default".into()
}

fn default_run_deadline() -> u64 {
    900
}

fn default_item_timeout() -> u64 {
    60
}

fn default_api_base() -> String {
    "https://api.xero.com/".into()
}

fn default_identity_base() -> String {
    "https://identity.xero.com/".into()
}

fn default_page_size() -> u32 {
    100
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            invoices: Paged {
                dir: "invoices".into(),
                floor: date(2019, 1, 1),
                max_pages: 7,
            },
            expenses: Single {
                floor: date(2024, 1, 1),
            },
            receipts: Paged {
                dir: "receipts".into(),
                floor: date(2020, 1, 1),
                max_pages: 25,
            },
            bills: Paged {
                dir: "bills".into(),
                floor: date(2020, 1, 1),
                max_pages: 25,
            },
        }
    }
}

impl App {
    /// Expand a leading `~/` in `data_dir` using `$HOME`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return Path::new(&home).join(rest);
            }
        }
        PathBuf::from(&self.data_dir)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_seconds)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_seconds)
    }
}

impl Config {
    /// Resolve an endpoint directory: absolute paths are kept, relative ones
    /// live under `app.data_dir`.
    pub fn endpoint_dir(&self, dir: &str) -> PathBuf {
        let p = Path::new(dir);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.app.resolved_data_dir().join(p)
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/archiver.db",
            self.app.resolved_data_dir().display()
        )
    }

    /// Ensure required directories exist: `app.data_dir` and every endpoint
    /// destination.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())?;
        for dir in [
            &self.endpoints.invoices.dir,
            &self.endpoints.receipts.dir,
            &self.endpoints.bills.dir,
        ] {
            fs::create_dir_all(self.endpoint_dir(dir))?;
        }
        Ok(())
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

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.session.trim().is_empty() {
        return Err(ConfigError::Invalid("app.session must be non-empty"));
    }
    if cfg.app.run_deadline_seconds == 0 {
        return Err(ConfigError::Invalid("app.run_deadline_seconds must be > 0"));
    }
    if cfg.app.item_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.item_timeout_seconds must be > 0"));
    }

    if cfg.xero.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("xero.client_id must be non-empty"));
    }
    if cfg.xero.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("xero.client_secret must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.xero.api_base).is_err() {
        return Err(ConfigError::Invalid("xero.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&cfg.xero.identity_base).is_err() {
        return Err(ConfigError::Invalid("xero.identity_base must be a valid URL"));
    }
    if cfg.xero.tenant_id.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ConfigError::Invalid("xero.tenant_id must be non-empty when set"));
    }
    if !(1..=100).contains(&cfg.xero.page_size) {
        return Err(ConfigError::Invalid("xero.page_size must be within 1..=100"));
    }

    let ep = &cfg.endpoints;
    if ep.invoices.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("endpoints.invoices.dir must be non-empty"));
    }
    if ep.invoices.max_pages == 0 {
        return Err(ConfigError::Invalid("endpoints.invoices.max_pages must be > 0"));
    }
    if ep.receipts.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("endpoints.receipts.dir must be non-empty"));
    }
    if ep.receipts.max_pages == 0 {
        return Err(ConfigError::Invalid("endpoints.receipts.max_pages must be > 0"));
    }
    if ep.bills.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("endpoints.bills.dir must be non-empty"));
    }
    if ep.bills.max_pages == 0 {
        return Err(ConfigError::Invalid("endpoints.bills.max_pages must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the project.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  session: "default"
  run_deadline_seconds: 900
  item_timeout_seconds: 60

xero:
  client_id: "YOUR_XERO_CLIENT_ID"
  client_secret: "YOUR_XERO_CLIENT_SECRET"
  api_base: "https://api.xero.com/"
  identity_base: "https://identity.xero.com/"
  page_size: 100

endpoints:
  invoices:
    dir: "invoices"
    floor: "2019-01-01"
    max_pages: 7
  expenses:
    floor: "2024-01-01"
  receipts:
    dir: "receipts"
    floor: "2020-01-01"
    max_pages: 25
  bills:
    dir: "bills"
    floor: "2020-01-01"
    max_pages: 25
"#
}
