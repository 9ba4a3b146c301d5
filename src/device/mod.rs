//! Device runtime.
//!
//! A [`Device`] owns one [`Session`] together with its own codec and command
//! registries. Nothing is shared between devices.
//!
//! # Driving a device
//!
//! Everything happens on the caller's task. After [`Device::connect`], either
//! await [`Device::wait_message`] in a loop (or just [`Device::run`]), or
//! interleave [`Device::check_message`] with other work. Command handlers run
//! inside those calls.
//!
//! ```ignore
//! let mut device = DeviceOptions::new()
//!     .org("acme")
//!     .device_type("sensor")
//!     .device_id("007")
//!     .token(TOKEN)
//!     .build(session, None)?;
//!
//! device.register_command("reboot", |payload: Payload| { /* ... */ })?;
//! device.connect().await?;
//! device.publish_event("status", &json!({"alive": true}).into()).await?;
//! device.run().await?;
//! ```
//!
//! # Sharing between tasks
//!
//! Registries, dispatch and the session must sit behind one lock when several
//! tasks touch the device. [`SharedDevice`] is that lock.

pub(crate) mod codec;
pub(crate) mod commands;
pub(crate) mod dispatch;
pub(crate) mod topic;
pub(crate) mod traits;

#[cfg(test)]
pub(crate) mod mock;

pub use codec::{CodecRegistry, Decoder, Encoder, JSON_FORMAT, JsonCodec, Payload, TEXT_FORMAT, TextCodec};
pub use commands::{CommandHandler, CommandRegistry};
pub use dispatch::{Dispatch, Dispatcher};
pub use topic::{
    COMMAND_TOPIC_FILTER, CommandRoute, MAX_TOPIC_LEN, RouteError, TopicError, event_topic,
    parse_command_topic, route_command,
};
pub use traits::{CheckStatus, DiscardSink, InboundSink, Session, SessionParams};

use embassy_sync::mutex::Mutex;

use crate::config::{ConnectionConfig, DeviceConfig, DeviceOptions, LogLevel};
use crate::error::DeviceError;
use crate::identity::{DeviceIdentity, SecurityMode};
use crate::packet::QoS;

/// A device behind an async mutex, for hosts with more than one task.
pub type SharedDevice<M, S> = Mutex<M, Device<S>>;

/// Where the device is in its connect/disconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A Watson IoT "unmanaged device".
pub struct Device<S: Session> {
    identity: DeviceIdentity,
    config: ConnectionConfig,
    session: S,
    state: SessionState,
    /// Whether inbound messages go to the dispatcher. Set by a non-quickstart connect.
    sink_installed: bool,
    codecs: CodecRegistry,
    commands: CommandRegistry,
}

impl DeviceOptions {
    /// Resolves the options over `persisted` and builds a device around `session`.
    pub fn build<S: Session>(
        self,
        session: S,
        persisted: Option<&DeviceConfig>,
    ) -> Result<Device<S>, DeviceError<S::Error>> {
        let (identity, config) = self.resolve(persisted)?;
        Ok(Device::new(identity, config, session))
    }
}

impl<S: Session> Device<S> {
    /// Creates a disconnected device with the built-in `json` and `text` codecs.
    pub fn new(identity: DeviceIdentity, config: ConnectionConfig, session: S) -> Self {
        Self {
            identity,
            config,
            session,
            state: SessionState::Disconnected,
            sink_installed: false,
            codecs: CodecRegistry::with_builtins(),
            commands: CommandRegistry::new(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Consumes the device, returning its session.
    pub fn into_session(self) -> S {
        self.session
    }

    /// Whether the organization is the anonymous quickstart service.
    pub fn is_quickstart(&self) -> bool {
        self.identity.is_quickstart()
    }

    pub fn security_mode(&self) -> SecurityMode {
        SecurityMode::derive(self.config.port, self.identity.org())
    }

    pub fn is_secure(&self) -> bool {
        self.security_mode().is_secure()
    }

    /// Host and port of the broker this device talks to.
    pub fn broker_address(&self) -> (&str, u16) {
        (self.identity.address(), self.config.port)
    }

    fn verbose(&self) -> bool {
        self.config.log_level <= LogLevel::Debug
    }

    // --- Codecs ---

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn register_encoder(&mut self, name: &str, encoder: impl Encoder + 'static) {
        self.codecs.register_encoder(name, encoder);
    }

    pub fn unregister_encoder(&mut self, name: &str) {
        self.codecs.unregister_encoder(name);
    }

    pub fn register_decoder(&mut self, name: &str, decoder: impl Decoder + 'static) {
        self.codecs.register_decoder(name, decoder);
    }

    pub fn unregister_decoder(&mut self, name: &str) {
        self.codecs.unregister_decoder(name);
    }

    // --- Commands ---

    /// Registers a handler for command `name`.
    ///
    /// Quickstart devices cannot receive commands, so registration fails there.
    pub fn register_command(
        &mut self,
        name: &str,
        handler: impl CommandHandler + 'static,
    ) -> Result<(), DeviceError<S::Error>> {
        if self.is_quickstart() {
            return Err(DeviceError::UnsupportedOperation(
                "quickstart org does not support commands",
            ));
        }
        self.commands.register(name, handler);
        Ok(())
    }

    pub fn unregister_command(&mut self, name: &str) {
        self.commands.unregister(name);
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    // --- Session lifecycle ---

    /// Opens the session and, outside quickstart, subscribes to commands.
    ///
    /// No retries: a failure leaves the device disconnected and is returned.
    pub async fn connect(&mut self) -> Result<(), DeviceError<S::Error>> {
        self.state = SessionState::Connecting;
        self.sink_installed = false;

        let params = SessionParams {
            client_id: self.identity.client_id(),
            address: self.identity.address(),
            port: self.config.port,
            username: &self.config.username,
            password: self.config.token.as_bytes(),
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            security: SecurityMode::derive(self.config.port, self.identity.org()),
            security_params: &self.config.ssl_params,
            trace: self.config.log_level <= LogLevel::Debug,
        };
        if let Err(err) = self.session.open(&params).await {
            self.state = SessionState::Disconnected;
            return Err(DeviceError::Transport(err));
        }
        debug!(
            "client \"{}\" connected to {}:{}",
            self.identity.client_id(),
            self.identity.address(),
            self.config.port
        );

        if !self.is_quickstart() {
            if let Err(err) = self
                .session
                .subscribe(COMMAND_TOPIC_FILTER, QoS::AtMostOnce)
                .await
            {
                warn!("command subscription failed, closing session");
                let _ = self.session.close().await;
                self.state = SessionState::Disconnected;
                return Err(DeviceError::Transport(err));
            }
            self.sink_installed = true;
            debug!("subscribed to device command topic: {}", COMMAND_TOPIC_FILTER);
        }

        self.state = SessionState::Connected;
        Ok(())
    }

    /// Probes the connection with a ping. Any failure reads as "not connected".
    pub async fn is_connected(&mut self) -> bool {
        match self.session.ping().await {
            Ok(()) => true,
            Err(_) => {
                debug!("liveness probe failed");
                false
            }
        }
    }

    /// Closes the session. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        match self.session.close().await {
            Ok(()) => info!("closed connection to the Watson IoT Platform"),
            Err(_) => warn!("attempted to disconnect from a disconnected session"),
        }
        self.state = SessionState::Disconnected;
        self.sink_installed = false;
    }

    // --- Publishing ---

    /// Publishes event `event_id` in `format` at `qos`.
    ///
    /// The payload goes through the encoder registered for `format`. With no
    /// encoder it is sent in its own byte form, so raw bytes can be published
    /// under any format name.
    ///
    /// The topic `iot-2/evt/<event_id>/fmt/<format>` must fit in
    /// [`MAX_TOPIC_LEN`] bytes, otherwise the call fails with
    /// [`DeviceError::InvalidArgument`].
    pub async fn publish(
        &mut self,
        event_id: &str,
        payload: &Payload,
        format: &str,
        qos: QoS,
    ) -> Result<(), DeviceError<S::Error>> {
        if qos == QoS::ExactlyOnce {
            return Err(DeviceError::UnsupportedQos);
        }
        let topic = event_topic(event_id, format).map_err(|err| {
            DeviceError::InvalidArgument(match err {
                TopicError::EmptyEventId => "event id is empty",
                TopicError::EmptyFormat => "format is empty",
                TopicError::TooLong => "event topic too long",
            })
        })?;
        if !self.is_connected().await {
            return Err(DeviceError::NotConnected);
        }

        let bytes = match self.codecs.encoder(format) {
            Some(encoder) => encoder.encode(payload)?,
            None => payload.to_bytes(),
        };
        if self.verbose() {
            debug!("publishing {} bytes to {}", bytes.len(), topic.as_str());
        }
        self.session
            .publish(&topic, &bytes, qos)
            .await
            .map_err(DeviceError::Transport)
    }

    /// Publishes a JSON event at QoS 0.
    pub async fn publish_event(
        &mut self,
        event_id: &str,
        payload: &Payload,
    ) -> Result<(), DeviceError<S::Error>> {
        self.publish(event_id, payload, JSON_FORMAT, QoS::AtMostOnce)
            .await
    }

    // --- Receiving ---

    /// Waits for one packet and dispatches it if it is a command.
    ///
    /// Returns whether a message was delivered to the sink.
    pub async fn wait_message(&mut self) -> Result<bool, DeviceError<S::Error>> {
        let verbose = self.verbose();
        let result = if self.sink_installed {
            let mut dispatcher = Dispatcher::new(&self.codecs, &mut self.commands).verbose(verbose);
            self.session.wait_message(&mut dispatcher).await
        } else {
            self.session.wait_message(&mut DiscardSink).await
        };
        result.map_err(DeviceError::Transport)
    }

    /// Dispatches a pending message if one is ready, without waiting.
    ///
    /// Fails with [`DeviceError::Unsupported`] when the session cannot check
    /// without blocking.
    pub async fn check_message(&mut self) -> Result<bool, DeviceError<S::Error>> {
        let verbose = self.verbose();
        let status = if self.sink_installed {
            let mut dispatcher = Dispatcher::new(&self.codecs, &mut self.commands).verbose(verbose);
            self.session.check_message(&mut dispatcher).await
        } else {
            self.session.check_message(&mut DiscardSink).await
        };
        match status.map_err(DeviceError::Transport)? {
            CheckStatus::Dispatched => Ok(true),
            CheckStatus::Idle => Ok(false),
            CheckStatus::Unsupported => Err(DeviceError::Unsupported),
        }
    }

    /// Waits for and dispatches messages for as long as the connection is alive.
    pub async fn run(&mut self) -> Result<(), DeviceError<S::Error>> {
        while self.is_connected().await {
            self.wait_message().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockError, MockSession};
    use super::*;
    use crate::error::{CodecError, ConfigError};
    use crate::identity::QUICKSTART_ORG;
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use serde_json::json;

    fn new_device(org: &str) -> Device<MockSession> {
        DeviceOptions::new()
            .org(org)
            .device_type("sensor")
            .device_id("007")
            .token("secret")
            .build(MockSession::default(), None)
            .unwrap()
    }

    fn connected(org: &str) -> Device<MockSession> {
        let mut device = new_device(org);
        block_on(device.connect()).unwrap();
        device
    }

    #[test]
    fn connect_opens_and_subscribes_to_commands() {
        let device = connected("acme");

        let session = device.session();
        let opened = session.opened.as_ref().unwrap();
        assert_eq!(opened.client_id, "d:acme:sensor:007");
        assert_eq!(opened.username, "use-token-auth");
        assert_eq!(opened.password, b"secret");
        assert!(opened.clean_session);
        assert_eq!(opened.security, SecurityMode::Secure);
        assert_eq!(session.subscriptions, ["iot-2/cmd/+/fmt/+"]);
        assert_eq!(device.state(), SessionState::Connected);
    }

    #[test]
    fn quickstart_connects_insecure_without_subscribing() {
        let device = connected(QUICKSTART_ORG);

        let session = device.session();
        assert_eq!(
            session.opened.as_ref().unwrap().security,
            SecurityMode::Insecure
        );
        assert!(session.subscriptions.is_empty());
        assert!(!device.is_secure());
    }

    #[test]
    fn failed_open_is_returned_and_leaves_device_disconnected() {
        let mut device = new_device("acme");
        device.session_mut().refuse_open = true;

        let err = block_on(device.connect()).unwrap_err();
        assert!(matches!(err, DeviceError::Transport(MockError::Refused)));
        assert_eq!(device.state(), SessionState::Disconnected);
        assert!(device.session().subscriptions.is_empty());
    }

    #[test]
    fn failed_subscription_closes_the_session() {
        let mut device = new_device("acme");
        device.session_mut().refuse_subscribe = true;

        assert!(block_on(device.connect()).is_err());
        assert!(!device.session().open);
        assert_eq!(device.state(), SessionState::Disconnected);
    }

    #[test]
    fn is_connected_follows_liveness_probe() {
        let mut device = new_device("acme");
        assert!(!block_on(device.is_connected()));

        block_on(device.connect()).unwrap();
        assert!(block_on(device.is_connected()));

        // Connection drops underneath the device.
        device.session_mut().open = false;
        assert!(!block_on(device.is_connected()));
    }

    #[test]
    fn disconnect_twice_is_not_an_error() {
        let mut device = connected("acme");
        block_on(device.disconnect());
        block_on(device.disconnect());
        assert_eq!(device.state(), SessionState::Disconnected);
        assert_eq!(device.session().closes, 1);
    }

    #[test]
    fn publish_encodes_json_on_event_topic() {
        let mut device = connected(QUICKSTART_ORG);
        block_on(device.publish_event("temp", &json!({"c": 21}).into())).unwrap();

        let (topic, payload, qos) = &device.session().published[0];
        assert_eq!(topic, "iot-2/evt/temp/fmt/json");
        assert_eq!(payload, br#"{"c":21}"#);
        assert_eq!(*qos, QoS::AtMostOnce);
    }

    #[test]
    fn publish_applies_registered_encoder() {
        let mut device = connected("acme");
        device.register_encoder("upper", |payload: &Payload| {
            let text = String::from_utf8(payload.to_bytes()).map_err(|_| CodecError::InvalidUtf8)?;
            Ok::<_, CodecError>(text.to_uppercase().into_bytes())
        });

        block_on(device.publish("msg", &"hello".into(), "upper", QoS::AtLeastOnce)).unwrap();

        let (topic, payload, qos) = &device.session().published[0];
        assert_eq!(topic, "iot-2/evt/msg/fmt/upper");
        assert_eq!(payload, b"HELLO");
        assert_eq!(*qos, QoS::AtLeastOnce);
    }

    #[test]
    fn publish_without_encoder_passes_payload_through() {
        let mut device = connected("acme");
        let raw = Payload::Bytes(alloc::vec![0x00, 0xFF, 0x10]);

        block_on(device.publish("blob", &raw, "bin", QoS::AtMostOnce)).unwrap();
        assert_eq!(device.session().published[0].1, [0x00, 0xFF, 0x10]);

        // Removing the json encoder makes json a pass-through format too.
        device.unregister_encoder(JSON_FORMAT);
        block_on(device.publish("blob", &raw, JSON_FORMAT, QoS::AtMostOnce)).unwrap();
        assert_eq!(device.session().published[1].1, [0x00, 0xFF, 0x10]);
    }

    #[test]
    fn qos2_is_rejected_in_every_state() {
        let mut device = new_device("acme");
        let payload = Payload::Text("x".into());

        let err = block_on(device.publish("e", &payload, JSON_FORMAT, QoS::ExactlyOnce));
        assert!(matches!(err, Err(DeviceError::UnsupportedQos)));

        block_on(device.connect()).unwrap();
        let err = block_on(device.publish("e", &payload, JSON_FORMAT, QoS::ExactlyOnce));
        assert!(matches!(err, Err(DeviceError::UnsupportedQos)));
        assert!(device.session().published.is_empty());
    }

    #[test]
    fn publish_preconditions_are_distinct_errors() {
        let mut device = new_device("acme");
        let payload = Payload::Text("x".into());

        let err = block_on(device.publish("temp", &payload, JSON_FORMAT, QoS::AtMostOnce));
        assert!(matches!(err, Err(DeviceError::NotConnected)));

        block_on(device.connect()).unwrap();
        let err = block_on(device.publish("  ", &payload, JSON_FORMAT, QoS::AtMostOnce));
        assert!(matches!(err, Err(DeviceError::InvalidArgument(_))));
    }

    #[test]
    fn encoder_failure_is_reported() {
        let mut device = connected("acme");
        let err = block_on(device.publish_event("e", &Payload::Bytes(alloc::vec![1])));
        assert!(matches!(
            err,
            Err(DeviceError::Codec(CodecError::UnsupportedPayload))
        ));
    }

    #[test]
    fn commands_are_refused_in_quickstart() {
        let mut device = new_device(QUICKSTART_ORG);
        let err = device.register_command("reboot", |_: Payload| {});
        assert!(matches!(err, Err(DeviceError::UnsupportedOperation(_))));

        let mut device = new_device("acme");
        assert!(device.register_command("reboot", |_: Payload| {}).is_ok());
        device.unregister_command("reboot");
        assert!(!device.commands().contains("reboot"));
    }

    #[test]
    fn wait_message_dispatches_to_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut device = connected("acme");
        let sink = seen.clone();
        device
            .register_command("reboot", move |payload: Payload| {
                sink.borrow_mut().push(payload)
            })
            .unwrap();

        device
            .session_mut()
            .push_inbound("iot-2/cmd/reboot/fmt/json", br#"{"force":true}"#);
        assert!(block_on(device.wait_message()).unwrap());
        assert_eq!(*seen.borrow(), [Payload::Json(json!({"force": true}))]);

        // Unknown command: nothing runs, nothing fails.
        device
            .session_mut()
            .push_inbound("iot-2/cmd/unknown/fmt/json", b"{}");
        assert!(block_on(device.wait_message()).unwrap());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn messages_before_connect_are_discarded() {
        let seen = Rc::new(RefCell::new(0));
        let mut device = new_device("acme");
        let sink = seen.clone();
        device
            .register_command("reboot", move |_: Payload| *sink.borrow_mut() += 1)
            .unwrap();

        device.session_mut().open = true;
        device
            .session_mut()
            .push_inbound("iot-2/cmd/reboot/fmt/json", b"{}");
        block_on(device.wait_message()).unwrap();
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn check_message_reports_unsupported_sessions() {
        let mut device = connected("acme");
        device.session_mut().nonblocking = false;
        assert!(matches!(
            block_on(device.check_message()),
            Err(DeviceError::Unsupported)
        ));

        device.session_mut().nonblocking = true;
        assert!(!block_on(device.check_message()).unwrap());

        device.register_command("ping", |_: Payload| {}).unwrap();
        device
            .session_mut()
            .push_inbound("iot-2/cmd/ping/fmt/text", b"hi");
        assert!(block_on(device.check_message()).unwrap());
    }

    #[test]
    fn run_stops_when_connection_goes_away() {
        let mut device = connected("acme");
        device.session_mut().drop_after_pings = Some(3);
        block_on(device.run()).unwrap();
        assert_eq!(device.session().pings, 3);
    }

    #[test]
    fn shared_device_serialises_access() {
        let shared: SharedDevice<NoopRawMutex, MockSession> = Mutex::new(connected("acme"));
        block_on(async {
            shared
                .lock()
                .await
                .publish_event("a", &json!(1).into())
                .await
                .unwrap();
            shared
                .lock()
                .await
                .publish_event("b", &json!(2).into())
                .await
                .unwrap();
        });
        let device = shared.into_inner();
        assert_eq!(device.session().published.len(), 2);
    }

    #[test]
    fn debug_log_level_turns_on_session_trace() {
        let mut device = DeviceOptions::new()
            .org("acme")
            .device_type("sensor")
            .device_id("007")
            .token("secret")
            .port(1883)
            .log_level("debug")
            .build(MockSession::default(), None)
            .unwrap();
        block_on(device.connect()).unwrap();

        let opened = device.session().opened.as_ref().unwrap();
        assert!(opened.trace);
        assert_eq!(opened.security, SecurityMode::Insecure);
        assert_eq!(device.broker_address(), (
            "acme.messaging.internetofthings.ibmcloud.com",
            1883
        ));
    }

    #[test]
    fn build_reports_missing_credentials() {
        let built = DeviceOptions::new()
            .org("acme")
            .device_type("sensor")
            .device_id("007")
            .build(MockSession::default(), None);
        assert!(matches!(
            built,
            Err(DeviceError::Config(ConfigError::MissingField("token")))
        ));
    }

    #[test]
    fn persisted_tls_options_reach_the_session() {
        let persisted = DeviceConfig::from_json(
            br#"{"org": "acme", "device_type": "sensor", "device_id": "007",
                 "token": "secret", "ssl_params": {"cert_reqs": 2}}"#,
        )
        .unwrap();
        let mut device = DeviceOptions::new()
            .build(MockSession::default(), Some(&persisted))
            .unwrap();
        block_on(device.connect()).unwrap();

        let opened = device.session().opened.as_ref().unwrap();
        assert_eq!(opened.security, SecurityMode::Secure);
        assert_eq!(opened.security_params.get("cert_reqs"), Some(&json!(2)));
    }

    #[test]
    fn long_event_ids_fit_the_topic_bound() {
        let mut device = connected("acme");
        let fits = "e".repeat(MAX_TOPIC_LEN - "iot-2/evt//fmt/json".len());
        block_on(device.publish_event(&fits, &json!(1).into())).unwrap();
        assert_eq!(device.session().published[0].0.len(), MAX_TOPIC_LEN);

        let too_long = "e".repeat(fits.len() + 1);
        assert!(matches!(
            block_on(device.publish_event(&too_long, &json!(1).into())),
            Err(DeviceError::InvalidArgument(_))
        ));
    }
}
