//! Connection configuration.
//!
//! Settings come from two places: a persisted record (typically a
//! `watson_iot.json` blob stored in flash) and explicit values supplied in code.
//! [`DeviceOptions::resolve`] merges them key by key, with explicit values taking
//! precedence, then fills in platform defaults.

use alloc::string::String;
use core::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::identity::{DEFAULT_DOMAIN, DeviceIdentity, QUICKSTART_ORG, SECURE_PORT};

/// Username the platform expects for token authentication.
pub const TOKEN_AUTH_USERNAME: &str = "use-token-auth";

/// Default MQTT keep-alive, in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 60;

/// Extra TLS settings, passed through to the session untouched.
pub type SecurityParams = serde_json::Map<String, serde_json::Value>;

/// Minimum severity the device logs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let level = match name.to_ascii_lowercase().as_str() {
            "trace" | "notset" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "critical" => LogLevel::Critical,
            _ => return Err(ConfigError::InvalidLogLevel),
        };
        Ok(level)
    }
}

/// The persisted configuration record. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub org: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub username: Option<String>,
    pub token: Option<String>,
    pub port: Option<u16>,
    pub clean_session: Option<bool>,
    pub domain: Option<String>,
    pub ssl_params: Option<SecurityParams>,
    pub log_level: Option<String>,
    pub keep_alive: Option<u16>,
}

impl DeviceConfig {
    /// Parses a JSON configuration record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(|_| ConfigError::Malformed)
    }

    /// Key-by-key merge; values present in `self` win over `fallback`.
    fn or(self, fallback: &DeviceConfig) -> DeviceConfig {
        DeviceConfig {
            org: self.org.or_else(|| fallback.org.clone()),
            device_type: self.device_type.or_else(|| fallback.device_type.clone()),
            device_id: self.device_id.or_else(|| fallback.device_id.clone()),
            username: self.username.or_else(|| fallback.username.clone()),
            token: self.token.or_else(|| fallback.token.clone()),
            port: self.port.or(fallback.port),
            clean_session: self.clean_session.or(fallback.clean_session),
            domain: self.domain.or_else(|| fallback.domain.clone()),
            ssl_params: self.ssl_params.or_else(|| fallback.ssl_params.clone()),
            log_level: self.log_level.or_else(|| fallback.log_level.clone()),
            keep_alive: self.keep_alive.or(fallback.keep_alive),
        }
    }
}

/// Resolved, immutable connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub username: String,
    pub token: String,
    pub port: u16,
    pub clean_session: bool,
    pub domain: String,
    pub ssl_params: SecurityParams,
    pub log_level: LogLevel,
    pub keep_alive: u16,
}

/// Explicit settings supplied by application code.
///
/// ```ignore
/// let persisted = DeviceConfig::from_json(include_bytes!("watson_iot.json"))?;
/// let device = DeviceOptions::new()
///     .device_id("my-device-id")
///     .build(session, Some(&persisted))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    explicit: DeviceConfig,
}

impl DeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn org(mut self, org: impl Into<String>) -> Self {
        self.explicit.org = Some(org.into());
        self
    }

    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.explicit.device_type = Some(device_type.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.explicit.device_id = Some(device_id.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.explicit.username = Some(username.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.explicit.token = Some(token.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.explicit.port = Some(port);
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.explicit.clean_session = Some(clean_session);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.explicit.domain = Some(domain.into());
        self
    }

    pub fn ssl_params(mut self, params: SecurityParams) -> Self {
        self.explicit.ssl_params = Some(params);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.explicit.log_level = Some(level.into());
        self
    }

    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.explicit.keep_alive = Some(seconds);
        self
    }

    /// Merges over `persisted`, applies defaults and validates required fields.
    pub fn resolve(
        self,
        persisted: Option<&DeviceConfig>,
    ) -> Result<(DeviceIdentity, ConnectionConfig), ConfigError> {
        let merged = match persisted {
            Some(record) => self.explicit.or(record),
            None => self.explicit,
        };

        let org = merged.org.unwrap_or_else(|| QUICKSTART_ORG.into());
        let domain = merged.domain.unwrap_or_else(|| DEFAULT_DOMAIN.into());
        let device_type = merged.device_type.unwrap_or_default();
        let device_id = merged.device_id.unwrap_or_default();
        let identity = DeviceIdentity::new(&org, &device_type, &device_id, &domain)?;

        let token = merged
            .token
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingField("token"))?;
        let log_level = match merged.log_level {
            Some(name) => name.parse()?,
            None => LogLevel::Info,
        };

        let config = ConnectionConfig {
            username: merged
                .username
                .unwrap_or_else(|| TOKEN_AUTH_USERNAME.into()),
            token,
            port: merged.port.unwrap_or(SECURE_PORT),
            clean_session: merged.clean_session.unwrap_or(true),
            domain,
            ssl_params: merged.ssl_params.unwrap_or_default(),
            log_level,
            keep_alive: merged.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE),
        };
        Ok((identity, config))
    }
}
