//! Command handlers keyed by command name.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;

use super::codec::Payload;

/// Application callback for one command.
///
/// Handlers run synchronously inside the receive call that delivered the
/// command, while the device is mutably borrowed. They cannot publish from
/// inside the callback. Record what needs doing and act on it after the
/// receive call returns.
pub trait CommandHandler {
    fn handle(&mut self, payload: Payload);
}

impl<F> CommandHandler for F
where
    F: FnMut(Payload),
{
    fn handle(&mut self, payload: Payload) {
        self(payload)
    }
}

/// Exact-name lookup table of command handlers.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: impl CommandHandler + 'static) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Removes the handler for `name`, if any.
    pub fn unregister(&mut self, name: &str) {
        self.handlers.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut (dyn CommandHandler + 'static)> {
        self.handlers.get_mut(name).map(|h| h.as_mut())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
