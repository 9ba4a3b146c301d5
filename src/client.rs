//! # MQTT 3.1.1 session adapter
//!
//! [`MqttClient`] speaks just enough MQTT 3.1.1 for a Watson IoT device over any
//! [`MqttTransport`]: connect with token credentials, one subscription, QoS 0/1
//! publishes, pings and inbound messages. It implements [`Session`], so a
//! [`Device`](crate::Device) can drive it directly.
//!
//! All buffers are fixed-size and owned by the client. `BUF_SIZE` bounds both
//! the largest outbound packet and the largest inbound frame.
//!
//! ```ignore
//! let transport = TcpTransport::new(socket, Duration::from_secs(5));
//! let session = MqttClient::<_, 1024>::new(transport);
//! let mut device = options.build(session, None)?;
//! device.connect().await?;
//! ```
//!
//! QoS 1 publishes are fire-and-forget: a packet id is assigned but the
//! client does not wait for the broker's `PUBACK`. Inbound QoS 1 messages are
//! acknowledged right after the sink has seen them.

use crate::device::{CheckStatus, DiscardSink, InboundSink, Session, SessionParams};
use crate::error::{MqttError, PacketError, ProtocolError};
use crate::packet::{
    self, ConnAck, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS,
    SubAck, Subscribe,
};
use crate::transport::{MqttTransport, TransportError};
use crate::util::{frame_len, frame_size};

/// What a received frame turned out to be, once its bytes are released.
enum Inbound {
    ConnAck(ConnAck),
    /// A message went to the sink; carries the packet id to acknowledge, if any.
    Message(Option<u16>),
    SubAck(SubAck),
    Other,
}

/// An MQTT client over a byte-stream transport.
pub struct MqttClient<T: MqttTransport, const BUF_SIZE: usize> {
    transport: T,
    tx: [u8; BUF_SIZE],
    rx: [u8; BUF_SIZE],
    /// Bytes of `rx` holding received but unconsumed data.
    rx_len: usize,
    /// Unread bytes of a dropped oversized frame, discarded before the next read.
    skip: usize,
    next_packet_id: u16,
    connected: bool,
    trace: bool,
}

impl<T: MqttTransport, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx: [0; BUF_SIZE],
            rx: [0; BUF_SIZE],
            rx_len: 0,
            skip: 0,
            next_packet_id: 1,
            connected: false,
            trace: false,
        }
    }

    /// Whether the broker accepted the last `CONNECT` and nothing has failed since.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Packet id 0 is reserved.
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn ensure_connected(&self) -> Result<(), MqttError<T::Error>> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    /// Maps a transport error, dropping the session unless it was a read timeout.
    fn transport_failed(&mut self, err: T::Error) -> MqttError<T::Error> {
        if err.is_timeout() {
            return MqttError::Timeout;
        }
        if self.connected {
            warn!("transport failed, session dropped");
        }
        self.reset();
        MqttError::Transport(err)
    }

    /// Forgets the connection and any partially received data.
    fn reset(&mut self) {
        self.connected = false;
        self.rx_len = 0;
        self.skip = 0;
    }

    async fn send_packet(&mut self, packet: &impl EncodePacket) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx)?;
        if self.trace {
            packet_trace!("mqtt tx: type {} ({} bytes)", self.tx[0] >> 4, len);
        }
        match self.transport.send(&self.tx[..len]).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.transport_failed(err)),
        }
    }

    /// Reads until `rx` starts with a complete frame and returns its length.
    ///
    /// A frame that cannot fit in `rx` is dropped whole: its tail is discarded
    /// from the stream so the next frame starts on a packet boundary.
    async fn fill_frame(&mut self) -> Result<usize, MqttError<T::Error>> {
        while self.skip > 0 {
            let chunk = self.skip.min(BUF_SIZE);
            let n = self.recv_into(0, chunk).await?;
            self.skip -= n.min(self.skip);
        }

        loop {
            let ready = match frame_len(&self.rx[..self.rx_len]) {
                Ok(ready) => ready,
                Err(err) => {
                    warn!("unreadable frame header, session dropped");
                    self.reset();
                    return Err(err.into());
                }
            };
            if let Some(len) = ready {
                return Ok(len);
            }
            if self.rx_len == BUF_SIZE {
                return Err(self.drop_oversized());
            }
            let n = self.recv_into(self.rx_len, BUF_SIZE).await?;
            self.rx_len += n;
        }
    }

    /// Receives into `rx[start..end]`. A zero-length read means the peer closed.
    async fn recv_into(&mut self, start: usize, end: usize) -> Result<usize, MqttError<T::Error>> {
        match self.transport.recv(&mut self.rx[start..end]).await {
            Ok(0) => {
                self.reset();
                Err(MqttError::Protocol(ProtocolError::ConnectionClosed))
            }
            Ok(n) => Ok(n),
            Err(err) => Err(self.transport_failed(err)),
        }
    }

    /// Discards the frame filling `rx` and arranges to skip the rest of it.
    fn drop_oversized(&mut self) -> MqttError<T::Error> {
        match frame_size(&self.rx[..self.rx_len]) {
            Ok(Some(total)) => {
                warn!("dropping {} byte frame, buffer holds {}", total, BUF_SIZE);
                self.skip = total - self.rx_len;
                self.rx_len = 0;
            }
            // Not even the header fits, so the stream cannot be resynchronised.
            _ => {
                warn!("{} byte buffer cannot hold a frame header, session dropped", BUF_SIZE);
                self.reset();
            }
        }
        MqttError::BufferTooSmall
    }

    /// Drops the first `len` bytes of `rx`, keeping anything after them.
    fn consume(&mut self, len: usize) {
        self.rx.copy_within(len..self.rx_len, 0);
        self.rx_len -= len;
    }

    /// Reads one frame, feeding a `PUBLISH` to `sink` and acknowledging it.
    async fn read_packet(&mut self, sink: &mut dyn InboundSink) -> Result<Inbound, MqttError<T::Error>> {
        let len = self.fill_frame().await?;
        if self.trace {
            packet_trace!("mqtt rx: type {} ({} bytes)", self.rx[0] >> 4, len);
        }

        let inbound = match packet::decode(&self.rx[..len]) {
            Ok(MqttPacket::Publish(publish)) => {
                sink.on_message(publish.topic, publish.payload);
                Ok(Inbound::Message(publish.packet_id))
            }
            Ok(MqttPacket::ConnAck(ack)) => Ok(Inbound::ConnAck(ack)),
            Ok(MqttPacket::SubAck(ack)) => Ok(Inbound::SubAck(ack)),
            Ok(MqttPacket::PubAck(_) | MqttPacket::PingResp) => Ok(Inbound::Other),
            // Well-framed packets this client has no use for, e.g. UNSUBACK or PUBREL.
            Err(PacketError::Protocol(ProtocolError::InvalidPacketType(kind)))
                if (1..=14).contains(&kind) =>
            {
                debug!("ignoring packet type {}", kind);
                Ok(Inbound::Other)
            }
            Err(err) => Err(err),
        };
        self.consume(len);
        let inbound = inbound?;

        if let Inbound::Message(Some(packet_id)) = inbound {
            self.send_packet(&PubAck { packet_id }).await?;
        }
        Ok(inbound)
    }
}

impl<T: MqttTransport, const BUF_SIZE: usize> Session for MqttClient<T, BUF_SIZE> {
    type Error = MqttError<T::Error>;

    async fn open(&mut self, params: &SessionParams<'_>) -> Result<(), Self::Error> {
        if params.security.is_secure() && !self.transport.is_secure() {
            error!("port {} requires an encrypted transport", params.port);
            return Err(MqttError::InsecureTransport);
        }
        self.trace = params.trace;
        self.reset();

        let connect = Connect::new(params.client_id, params.keep_alive, params.clean_session)
            .with_credentials(params.username, params.password);
        self.send_packet(&connect).await?;

        // The broker must answer CONNECT with CONNACK before anything else.
        match self.read_packet(&mut DiscardSink).await? {
            Inbound::ConnAck(ack) if ack.reason_code == 0 => {
                self.connected = true;
                info!(
                    "connected to {}:{} as \"{}\"",
                    params.address,
                    params.port,
                    params.client_id
                );
                Ok(())
            }
            Inbound::ConnAck(ack) => {
                warn!("broker refused connection, code {}", ack.reason_code);
                Err(MqttError::ConnectionRefused(ack.reason_code.into()))
            }
            _ => Err(MqttError::Protocol(ProtocolError::InvalidResponse)),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.ensure_connected()?;
        let sent = self.send_packet(&Disconnect).await;
        self.reset();
        sent
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error> {
        self.ensure_connected()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.next_packet_id()),
            QoS::ExactlyOnce => return Err(MqttError::UnsupportedQos),
        };
        let publish = Publish {
            topic: topic.as_bytes(),
            qos,
            payload,
            packet_id,
        };
        self.send_packet(&publish).await
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error> {
        self.ensure_connected()?;
        let packet_id = self.next_packet_id();
        self.send_packet(&Subscribe::new(packet_id, filter, qos))
            .await?;

        loop {
            match self.read_packet(&mut DiscardSink).await? {
                Inbound::SubAck(ack) if ack.packet_id == packet_id => {
                    if ack.is_rejected() {
                        warn!("subscription to {} rejected", filter);
                        return Err(MqttError::SubscribeRejected);
                    }
                    return Ok(());
                }
                _ => continue,
            }
        }
    }

    async fn ping(&mut self) -> Result<(), Self::Error> {
        self.ensure_connected()?;
        self.send_packet(&PingReq).await
    }

    async fn wait_message(&mut self, sink: &mut dyn InboundSink) -> Result<bool, Self::Error> {
        self.ensure_connected()?;
        match self.read_packet(sink).await {
            Ok(Inbound::Message(_)) => Ok(true),
            Ok(_) | Err(MqttError::Timeout) => Ok(false),
            Err(MqttError::BufferTooSmall) if self.connected => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Never waits on an idle connection. Once bytes have started to arrive,
    /// the rest of that frame is awaited within the transport's read timeout.
    async fn check_message(
        &mut self,
        sink: &mut dyn InboundSink,
    ) -> Result<CheckStatus, Self::Error> {
        self.ensure_connected()?;
        let buffered = matches!(frame_len(&self.rx[..self.rx_len]), Ok(Some(_)));
        if !buffered {
            match self.transport.read_ready() {
                None => return Ok(CheckStatus::Unsupported),
                Some(false) => return Ok(CheckStatus::Idle),
                Some(true) => {}
            }
        }
        match self.read_packet(sink).await {
            Ok(Inbound::Message(_)) => Ok(CheckStatus::Dispatched),
            Ok(_) | Err(MqttError::Timeout) => Ok(CheckStatus::Idle),
            Err(MqttError::BufferTooSmall) if self.connected => Ok(CheckStatus::Idle),
            Err(err) => Err(err),
        }
    }
}
