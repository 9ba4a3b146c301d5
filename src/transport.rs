//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the underlying
//! communication channel (like TCP, UART, etc.), allowing the MQTT session to be
//! hardware and network-stack agnostic.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embassy_time::{Duration, Timer};
use embedded_io_async::{ReadReady, Write};

/// A trait representing a byte-stream transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Reports whether `recv` would return without waiting.
    ///
    /// `None` means the transport cannot tell, which makes non-blocking
    /// message checks unavailable on top of it.
    fn read_ready(&mut self) -> Option<bool> {
        None
    }

    /// Whether the channel is encrypted (TLS or equivalent).
    fn is_secure(&self) -> bool {
        false
    }
}

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {
    /// Whether the error only means that no data arrived before a deadline.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl TransportError for TcpError {}

/// Errors from [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpTransportError {
    /// The socket reported an error.
    Tcp(TcpError),
    /// The peer closed the connection.
    Closed,
    /// No data arrived within the read timeout.
    Timeout,
}

impl TransportError for TcpTransportError {
    fn is_timeout(&self) -> bool {
        matches!(self, TcpTransportError::Timeout)
    }
}

/// Plaintext TCP transport implementation using `embassy-net`.
///
/// The socket must already be connected to the broker address returned by
/// [`Device::broker_address`](crate::Device::broker_address).
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and read timeout.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// Gives the socket back, e.g. to close or reconnect it.
    pub fn into_inner(self) -> TcpSocket<'a> {
        self.socket
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        // Race the read operation against a timer.
        let read_fut = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                // If the peer closes the connection, read returns 0.
                debug!("tcp connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => Ok(n),
            futures::future::Either::Left((Err(e), _)) => {
                warn!("tcp read error: {:?}", e);
                Err(TcpTransportError::Tcp(e))
            }
            futures::future::Either::Right(((), _)) => Err(TcpTransportError::Timeout),
        }
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.socket.write_all(buf).await.map_err(|e| {
            warn!("tcp write error: {:?}", e);
            TcpTransportError::Tcp(e)
        })?;

        // Flush to ensure data is actually sent to the network
        self.socket.flush().await.map_err(TcpTransportError::Tcp)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }

    fn read_ready(&mut self) -> Option<bool> {
        // A socket error makes the next read return immediately, so report ready.
        Some(self.socket.read_ready().unwrap_or(true))
    }
}
