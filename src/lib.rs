//! # Watson IoT Device Client for Embedded Systems
//!
//! `watson-iot-device` connects a device to the IBM Watson IoT Platform over
//! MQTT. It publishes device events and dispatches platform commands to
//! application handlers. It is `no_std` (with `alloc`) and built on the
//! [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Core Features
//!
//! - **Per-device state:** every [`Device`] owns its session, its codec
//!   registry and its command registry. Several devices can coexist.
//! - **Pluggable formats:** `json` and `text` codecs are built in; register your
//!   own encoders and decoders for any other format name.
//! - **Commands:** handlers are keyed by command name and receive the decoded
//!   payload. Unknown commands and undecodable payloads are logged and dropped.
//! - **Quickstart:** with no organization configured the device connects
//!   anonymously to the `quickstart` service, which is publish-only.
//! - **Transport agnostic:** the bundled [`MqttClient`] speaks MQTT 3.1.1 over
//!   any [`MqttTransport`]. Hosts with their own MQTT stack implement
//!   [`Session`] instead.
//!
//! ## Usage
//!
//! ```ignore
//! use watson_iot_device::{DeviceConfig, DeviceOptions, MqttClient, Payload, TcpTransport};
//!
//! let persisted = DeviceConfig::from_json(CONFIG_BYTES)?;
//! let session = MqttClient::<_, 1024>::new(TcpTransport::new(socket, timeout));
//! let mut device = DeviceOptions::new().build(session, Some(&persisted))?;
//!
//! device.register_command("reboot", |payload: Payload| {
//!     // schedule a reboot
//! })?;
//! device.connect().await?;
//! device.publish_event("temp", &serde_json::json!({"c": 21}).into()).await?;
//! device.run().await?;
//! ```
//!
//! ## Receive Model
//!
//! Nothing runs in the background. Inbound commands are handled only while the
//! application awaits [`Device::wait_message`], [`Device::check_message`] or
//! [`Device::run`], on the application's own task.
//!
//! ## Logging
//!
//! Enable the `log` or `defmt` feature to route diagnostics to that backend.
//! `esp32-log` prints per-packet traces on the ESP32 console when the
//! configured log level is `debug` or lower.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod fmt;

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod identity;
pub mod packet;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::MqttClient;
pub use config::{ConnectionConfig, DeviceConfig, DeviceOptions, LogLevel};
pub use device::{
    CodecRegistry, CommandRegistry, Decoder, Device, Encoder, InboundSink, Payload, Session,
    SessionParams, SessionState, SharedDevice,
};
pub use error::{CodecError, ConfigError, DeviceError, MqttError};
pub use identity::{DeviceIdentity, SecurityMode};
pub use packet::QoS;
pub use transport::{MqttTransport, TcpTransport};
