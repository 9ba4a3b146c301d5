//! Device identity and derived connection parameters.

use alloc::format;
use alloc::string::String;

use crate::error::ConfigError;

/// Organization id of the unauthenticated "quickstart" service.
pub const QUICKSTART_ORG: &str = "quickstart";

/// Default Watson IoT Platform domain.
pub const DEFAULT_DOMAIN: &str = "internetofthings.ibmcloud.com";

/// Broker port that carries TLS.
pub const SECURE_PORT: u16 = 8883;

/// Whether the session runs over a secure channel.
///
/// Derived from the port and organization, never configured directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityMode {
    Secure,
    Insecure,
}

impl SecurityMode {
    /// `Secure` iff the port is [`SECURE_PORT`] and the organization is not quickstart.
    pub fn derive(port: u16, org: &str) -> Self {
        if port == SECURE_PORT && org != QUICKSTART_ORG {
            SecurityMode::Secure
        } else {
            SecurityMode::Insecure
        }
    }

    pub fn is_secure(self) -> bool {
        self == SecurityMode::Secure
    }
}

/// Who the device is on the platform, plus the derived client id and broker host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    org: String,
    device_type: String,
    device_id: String,
    client_id: String,
    address: String,
}

impl DeviceIdentity {
    /// Builds an identity, failing if the device type or id is empty.
    pub fn new(
        org: &str,
        device_type: &str,
        device_id: &str,
        domain: &str,
    ) -> Result<Self, ConfigError> {
        if device_type.is_empty() {
            return Err(ConfigError::MissingField("device_type"));
        }
        if device_id.is_empty() {
            return Err(ConfigError::MissingField("device_id"));
        }

        Ok(Self {
            org: org.into(),
            device_type: device_type.into(),
            device_id: device_id.into(),
            client_id: format!("d:{org}:{device_type}:{device_id}"),
            address: format!("{org}.messaging.{domain}"),
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// MQTT client identifier, `d:<org>:<type>:<id>`.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Broker host name, `<org>.messaging.<domain>`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_quickstart(&self) -> bool {
        self.org == QUICKSTART_ORG
    }
}
