//! Inbound command dispatch.

use super::codec::{CodecRegistry, Payload};
use super::commands::CommandRegistry;
use super::topic::route_command;
use super::traits::InboundSink;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// The topic did not match `iot-2/cmd/<command>/fmt/<format>`.
    Unroutable,
    /// A decoder exists for the format but rejected the payload.
    DecodeFailed,
    /// No handler is registered for the command.
    NoHandler,
}

/// Routes inbound messages to command handlers.
///
/// Looks up codecs and handlers but never adds or removes entries. Every
/// failure is logged and contained, so nothing a broker sends can make
/// [`InboundSink::on_message`] fail.
pub struct Dispatcher<'r> {
    codecs: &'r CodecRegistry,
    commands: &'r mut CommandRegistry,
    verbose: bool,
}

impl<'r> Dispatcher<'r> {
    pub fn new(codecs: &'r CodecRegistry, commands: &'r mut CommandRegistry) -> Self {
        Self {
            codecs,
            commands,
            verbose: false,
        }
    }

    /// Logs every message at debug level, not just the failures.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Routes, decodes and delivers one message.
    pub fn dispatch(&mut self, topic: &[u8], payload: &[u8]) -> Dispatch {
        let route = match route_command(topic) {
            Ok(route) => route,
            Err(err) => {
                warn!("dropping message on unroutable topic: {:?}", err);
                return Dispatch::Unroutable;
            }
        };

        let message = match self.codecs.decoder(route.format) {
            Some(decoder) => match decoder.decode(payload) {
                Ok(message) => message,
                Err(err) => {
                    warn!(
                        "command \"{}\": {} payload rejected by decoder: {:?}",
                        route.command, route.format, err
                    );
                    return Dispatch::DecodeFailed;
                }
            },
            None => {
                debug!("no suitable decoder for message format \"{}\"", route.format);
                Payload::Bytes(payload.into())
            }
        };

        if self.verbose {
            debug!(
                "command \"{}\" format \"{}\" ({} bytes)",
                route.command,
                route.format,
                payload.len()
            );
        }

        match self.commands.get_mut(route.command) {
            Some(handler) => {
                info!("received command \"{}\"", route.command);
                handler.handle(message);
                Dispatch::Handled
            }
            None => {
                warn!(
                    "command \"{}\" received, but no handler registered",
                    route.command
                );
                Dispatch::NoHandler
            }
        }
    }
}

impl InboundSink for Dispatcher<'_> {
    fn on_message(&mut self, topic: &[u8], payload: &[u8]) {
        let _ = self.dispatch(topic, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use serde_json::json;

    fn recording(commands: &mut CommandRegistry, name: &str) -> Rc<RefCell<Vec<Payload>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        commands.register(name, move |payload: Payload| sink.borrow_mut().push(payload));
        seen
    }

    #[test]
    fn decodes_json_before_invoking_handler() {
        let codecs = CodecRegistry::with_builtins();
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "reboot");

        let outcome = Dispatcher::new(&codecs, &mut commands)
            .dispatch(b"iot-2/cmd/reboot/fmt/json", br#"{"force":true}"#);

        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(*seen.borrow(), [Payload::Json(json!({"force": true}))]);
    }

    #[test]
    fn unknown_format_passes_raw_bytes() {
        let codecs = CodecRegistry::with_builtins();
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "firmware");

        let outcome = Dispatcher::new(&codecs, &mut commands)
            .dispatch(b"iot-2/cmd/firmware/fmt/bin", &[0xDE, 0xAD]);

        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(*seen.borrow(), [Payload::Bytes(alloc::vec![0xDE, 0xAD])]);
    }

    #[test]
    fn unknown_command_is_dropped() {
        let codecs = CodecRegistry::with_builtins();
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "reboot");

        let outcome =
            Dispatcher::new(&codecs, &mut commands).dispatch(b"iot-2/cmd/unknown/fmt/json", b"{}");

        assert_eq!(outcome, Dispatch::NoHandler);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn unroutable_topics_never_reach_handlers() {
        let codecs = CodecRegistry::with_builtins();
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "reboot");
        let mut dispatcher = Dispatcher::new(&codecs, &mut commands);

        let topics: [&[u8]; 4] = [
            b"iot-2/cmd/reboot",
            b"iot-2/evt/reboot/fmt/json",
            b"devices/reboot/fmt/json",
            &[0xFF, 0xFE],
        ];
        for topic in topics {
            assert_eq!(dispatcher.dispatch(topic, b"{}"), Dispatch::Unroutable);
        }
        drop(dispatcher);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn decoder_failure_drops_message() {
        let codecs = CodecRegistry::with_builtins();
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "reboot");

        let outcome =
            Dispatcher::new(&codecs, &mut commands).dispatch(b"iot-2/cmd/reboot/fmt/json", b"{");

        assert_eq!(outcome, Dispatch::DecodeFailed);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn custom_decoder_is_used_for_its_format() {
        let mut codecs = CodecRegistry::with_builtins();
        codecs.register_decoder("csv", |bytes: &[u8]| {
            let text = core::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
            Ok::<_, CodecError>(Payload::Json(text.split(',').collect::<Vec<_>>().into()))
        });
        let mut commands = CommandRegistry::new();
        let seen = recording(&mut commands, "set");

        Dispatcher::new(&codecs, &mut commands).on_message(b"iot-2/cmd/set/fmt/csv", b"a,b");

        assert_eq!(*seen.borrow(), [Payload::Json(json!(["a", "b"]))]);
    }
}
