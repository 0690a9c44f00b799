//! Runtime configuration read from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::generators::convert::{DEFAULT_CONVERSION_TIMEOUT, DEFAULT_CONVERTER_BIN};

pub const DEFAULT_TEMPLATE_PATH: &str = "templates/invoice_template.odt";
pub const DEFAULT_ARCHIVE_ROOT: &str = "output";
pub const DEFAULT_LOCATION: &str = "Rijeka";
pub const DEFAULT_DUE_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings shared by every invoice-generation request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// ODT template with a Jinja-templated `content.xml`.
    pub template_path: PathBuf,
    pub archive_root: PathBuf,
    /// Parent of per-request scratch directories; system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub converter_bin: String,
    pub converter_timeout: Duration,
    /// Place of issue printed on the invoice.
    pub location: String,
    pub due_days: i64,
    pub bind_address: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            temp_dir: None,
            converter_bin: DEFAULT_CONVERTER_BIN.to_string(),
            converter_timeout: DEFAULT_CONVERSION_TIMEOUT,
            location: DEFAULT_LOCATION.to_string(),
            due_days: DEFAULT_DUE_DAYS,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Defaults with explicit template and archive locations.
    pub fn with_paths(template_path: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            archive_root: archive_root.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = value("INVOICE_TEMPLATE_PATH") {
            config.template_path = PathBuf::from(path);
        }
        if let Some(root) = value("INVOICE_ARCHIVE_ROOT") {
            config.archive_root = PathBuf::from(root);
        }
        if let Some(dir) = value("INVOICE_TEMP_DIR") {
            config.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(bin) = value("INVOICE_CONVERTER_BIN") {
            config.converter_bin = bin;
        }
        if let Some(secs) = value("INVOICE_CONVERTER_TIMEOUT_SECS") {
            let secs: u64 = parse_value("INVOICE_CONVERTER_TIMEOUT_SECS", &secs)?;
            config.converter_timeout = Duration::from_secs(secs);
        }
        if let Some(location) = value("INVOICE_LOCATION") {
            config.location = location;
        }
        if let Some(days) = value("INVOICE_DUE_DAYS") {
            config.due_days = parse_value("INVOICE_DUE_DAYS", &days)?;
        }
        if let Some(address) = value("BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Some(port) = value("PORT") {
            config.port = parse_value("PORT", &port)?;
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}
