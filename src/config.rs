use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
const DEFAULT_CURRENCY: &str = "INR";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("SNAP_SELL_PUBLIC_URL is not a valid URL: {0}")]
    PublicUrl(String),
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub offline: bool,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
    pub public_url: Option<url::Url>,
    pub currency: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            offline: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            public_url: None,
            currency: DEFAULT_CURRENCY.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        let port = match get("PORT") {
            Some(v) => parse_number::<u16>("PORT", &v)?,
            None => defaults.port,
        };

        let max_upload_bytes = match get("SNAP_SELL_MAX_UPLOAD_BYTES") {
            Some(v) => parse_number::<usize>("SNAP_SELL_MAX_UPLOAD_BYTES", &v)?,
            None => defaults.max_upload_bytes,
        };
        if max_upload_bytes == 0 {
            return Err(ConfigError::Zero {
                name: "SNAP_SELL_MAX_UPLOAD_BYTES",
            });
        }

        let session_ttl = match get("SNAP_SELL_SESSION_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_number::<u64>("SNAP_SELL_SESSION_TTL_SECS", &v)?),
            None => defaults.session_ttl,
        };
        if session_ttl.is_zero() {
            return Err(ConfigError::Zero {
                name: "SNAP_SELL_SESSION_TTL_SECS",
            });
        }

        let public_url = get("SNAP_SELL_PUBLIC_URL")
            .map(|v| url::Url::parse(&v).map_err(|e| ConfigError::PublicUrl(e.to_string())))
            .transpose()?;

        let log_format = match get("SNAP_SELL_LOG_FORMAT").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Config {
            port,
            api_key: get("OPENAI_API_KEY"),
            api_base: get("SNAP_SELL_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            model: get("SNAP_SELL_MODEL").unwrap_or(defaults.model),
            offline: get("SNAP_SELL_OFFLINE").as_deref() == Some("1"),
            max_upload_bytes,
            session_ttl,
            public_url,
            currency: get("SNAP_SELL_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or(defaults.currency),
            log_format,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::NotANumber {
        name,
        value: value.to_string(),
    })
}
