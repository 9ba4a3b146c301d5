//! # Error Types
//!
//! Errors are split by layer. [`DeviceError`] is what application code sees from
//! the [`Device`](crate::Device) API. [`MqttError`] comes out of the bundled MQTT
//! session adapter, and [`PacketError`] out of the packet codec underneath it.
//! [`ConfigError`] and [`CodecError`] cover construction and payload conversion.

use core::fmt;

/// Errors returned by [`Device`](crate::Device) operations.
///
/// Generic over the session error type `E`, so transport failures pass through
/// without losing their concrete type.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError<E> {
    /// The device could not be constructed from the given configuration.
    Config(ConfigError),
    /// The underlying session failed.
    Transport(E),
    /// The operation needs a live connection.
    NotConnected,
    /// QoS 2 (exactly once) is not supported.
    UnsupportedQos,
    /// An argument failed validation.
    InvalidArgument(&'static str),
    /// The operation is not permitted in the current mode.
    UnsupportedOperation(&'static str),
    /// The session cannot perform a non-blocking receive on this host.
    Unsupported,
    /// The payload could not be encoded.
    Codec(CodecError),
}

impl<E> From<ConfigError> for DeviceError<E> {
    fn from(err: ConfigError) -> Self {
        DeviceError::Config(err)
    }
}

impl<E> From<CodecError> for DeviceError<E> {
    fn from(err: CodecError) -> Self {
        DeviceError::Codec(err)
    }
}

impl<E: fmt::Debug> fmt::Display for DeviceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Config(err) => write!(f, "invalid configuration: {err}"),
            DeviceError::Transport(err) => write!(f, "transport error: {err:?}"),
            DeviceError::NotConnected => f.write_str("client is not connected"),
            DeviceError::UnsupportedQos => f.write_str("QoS level 2 not implemented"),
            DeviceError::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            DeviceError::UnsupportedOperation(what) => write!(f, "unsupported operation: {what}"),
            DeviceError::Unsupported => {
                f.write_str("non-blocking receive is not supported by this session")
            }
            DeviceError::Codec(err) => write!(f, "codec error: {err}"),
        }
    }
}

/// Problems found while resolving device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A required field was absent or empty.
    MissingField(&'static str),
    /// The log level name is not recognised.
    InvalidLogLevel,
    /// The persisted configuration is not valid JSON for the expected shape.
    Malformed,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField(name) => write!(f, "\"{name}\" parameter required"),
            ConfigError::InvalidLogLevel => f.write_str("unknown log level"),
            ConfigError::Malformed => f.write_str("malformed configuration record"),
        }
    }
}

/// Payload conversion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Bytes were not valid UTF-8.
    InvalidUtf8,
    /// Bytes were not valid JSON.
    InvalidJson,
    /// The codec cannot represent this kind of payload.
    UnsupportedPayload,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidUtf8 => f.write_str("payload is not valid UTF-8"),
            CodecError::InvalidJson => f.write_str("payload is not valid JSON"),
            CodecError::UnsupportedPayload => f.write_str("payload kind not supported by codec"),
        }
    }
}

/// The primary error enum for the MQTT session adapter.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g., TCP, UART).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// The broker sent bytes that break the MQTT 3.1.1 wire format.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The broker refused a subscription.
    SubscribeRejected,
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// An operation timed out.
    Timeout,
    /// A secure session was requested over a plaintext transport.
    InsecureTransport,
    /// QoS 2 flows are not implemented.
    UnsupportedQos,
}

impl<T> From<PacketError> for MqttError<T> {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Protocol(p) => MqttError::Protocol(p),
            PacketError::BufferTooSmall => MqttError::BufferTooSmall,
        }
    }
}

impl<T> MqttError<T> {
    /// Whether this error only means that no bytes arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MqttError::Timeout)
    }
}

/// Errors produced while encoding or decoding packets.
///
/// Packet code never touches the transport, so it has its own error type that
/// converts into [`MqttError`] for any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// The bytes do not form a valid packet.
    Protocol(ProtocolError),
    /// The buffer provided for encoding was too small.
    BufferTooSmall,
}

impl From<ProtocolError> for PacketError {
    fn from(err: ProtocolError) -> Self {
        PacketError::Protocol(err)
    }
}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent an invalid or unexpected response.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
}
