//! The contract between a [`Device`](super::Device) and its MQTT session.
//!
//! The device never speaks MQTT itself. It drives a [`Session`], which owns the
//! connection and the wire protocol, and hands it an [`InboundSink`] whenever it
//! asks for messages. [`MqttClient`](crate::client::MqttClient) is the bundled
//! implementation; tests and hosts with their own MQTT stack can provide others.
//!
//! # Receive model
//!
//! Inbound messages are never queued by the device. A session delivers each one
//! synchronously to the sink passed into [`Session::wait_message`] or
//! [`Session::check_message`], and the message is gone once the sink returns.

use crate::config::SecurityParams;
use crate::identity::SecurityMode;
use crate::packet::QoS;

/// Receives inbound messages from a session.
///
/// Object-safe so sessions can take `&mut dyn InboundSink` without generics.
/// Implementations must not panic on malformed input; a bad message from the
/// broker is logged and dropped.
pub trait InboundSink {
    /// Handles one message. `topic` and `payload` are the raw bytes off the wire.
    fn on_message(&mut self, topic: &[u8], payload: &[u8]);
}

/// A sink that drops everything, used when commands are disabled.
pub struct DiscardSink;

impl InboundSink for DiscardSink {
    fn on_message(&mut self, _topic: &[u8], payload: &[u8]) {
        debug!(
            "dropping {} byte message: no command sink installed",
            payload.len()
        );
    }
}

/// Outcome of a non-blocking message check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CheckStatus {
    /// A message was read and handed to the sink.
    Dispatched,
    /// Nothing was pending.
    Idle,
    /// The session cannot check without blocking on this host.
    Unsupported,
}

/// Everything a session needs to open a connection.
#[derive(Debug, Clone, Copy)]
pub struct SessionParams<'a> {
    pub client_id: &'a str,
    /// Broker host name, for sessions that resolve and dial it themselves.
    pub address: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a [u8],
    pub keep_alive: u16,
    pub clean_session: bool,
    pub security: SecurityMode,
    pub security_params: &'a SecurityParams,
    /// Emit per-packet diagnostics.
    pub trace: bool,
}

/// An MQTT session as seen by the device.
///
/// Every method is a single, non-retrying attempt. Timeouts are whatever the
/// session's own transport imposes.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// The error type returned by the session.
    type Error: core::fmt::Debug;

    /// Opens the session with the broker.
    async fn open(&mut self, params: &SessionParams<'_>) -> Result<(), Self::Error>;

    /// Closes the session. Fails if it is already closed.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Publishes one message.
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error>;

    /// Subscribes to a topic filter.
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Liveness probe. Succeeds iff the connection accepted a ping.
    async fn ping(&mut self) -> Result<(), Self::Error>;

    /// Waits for the next packet and feeds any inbound message to `sink`.
    ///
    /// Returns `true` if a message was dispatched, `false` if the wait ended
    /// without one (control packet or transport timeout).
    async fn wait_message(&mut self, sink: &mut dyn InboundSink) -> Result<bool, Self::Error>;

    /// Reads a pending message if there is one, without waiting for the network.
    async fn check_message(&mut self, sink: &mut dyn InboundSink)
    -> Result<CheckStatus, Self::Error>;
}
