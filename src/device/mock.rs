//! Recording session used by the device tests.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use super::traits::{CheckStatus, InboundSink, Session, SessionParams};
use crate::config::SecurityParams;
use crate::identity::SecurityMode;
use crate::packet::QoS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockError {
    Closed,
    Refused,
}

/// Owned copy of the parameters the session was opened with.
#[derive(Debug)]
pub(crate) struct Opened {
    pub client_id: String,
    pub username: String,
    pub password: Vec<u8>,
    pub clean_session: bool,
    pub security: SecurityMode,
    pub security_params: SecurityParams,
    pub trace: bool,
}

#[derive(Default)]
pub(crate) struct MockSession {
    pub open: bool,
    pub refuse_open: bool,
    pub refuse_subscribe: bool,
    pub nonblocking: bool,
    /// The connection drops when the n-th ping is sent.
    pub drop_after_pings: Option<usize>,
    pub opened: Option<Opened>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>, QoS)>,
    pub inbound: VecDeque<(Vec<u8>, Vec<u8>)>,
    pub pings: usize,
    pub closes: usize,
}

impl MockSession {
    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbound
            .push_back((topic.as_bytes().to_vec(), payload.to_vec()));
    }

    fn ensure_open(&self) -> Result<(), MockError> {
        if self.open {
            Ok(())
        } else {
            Err(MockError::Closed)
        }
    }

    fn deliver(&mut self, sink: &mut dyn InboundSink) -> bool {
        match self.inbound.pop_front() {
            Some((topic, payload)) => {
                sink.on_message(&topic, &payload);
                true
            }
            None => false,
        }
    }
}

impl Session for MockSession {
    type Error = MockError;

    async fn open(&mut self, params: &SessionParams<'_>) -> Result<(), MockError> {
        if self.refuse_open {
            return Err(MockError::Refused);
        }
        self.opened = Some(Opened {
            client_id: params.client_id.into(),
            username: params.username.into(),
            password: params.password.to_vec(),
            clean_session: params.clean_session,
            security_params: params.security_params.clone(),
            security: params.security,
            trace: params.trace,
        });
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MockError> {
        self.ensure_open()?;
        self.open = false;
        self.closes += 1;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), MockError> {
        self.ensure_open()?;
        self.published.push((topic.into(), payload.to_vec(), qos));
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<(), MockError> {
        self.ensure_open()?;
        if self.refuse_subscribe {
            return Err(MockError::Refused);
        }
        self.subscriptions.push(filter.into());
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), MockError> {
        self.pings += 1;
        if self.drop_after_pings.is_some_and(|limit| self.pings >= limit) {
            self.open = false;
        }
        self.ensure_open()
    }

    async fn wait_message(&mut self, sink: &mut dyn InboundSink) -> Result<bool, MockError> {
        self.ensure_open()?;
        Ok(self.deliver(sink))
    }

    async fn check_message(&mut self, sink: &mut dyn InboundSink) -> Result<CheckStatus, MockError> {
        self.ensure_open()?;
        if !self.nonblocking {
            return Ok(CheckStatus::Unsupported);
        }
        if self.deliver(sink) {
            Ok(CheckStatus::Dispatched)
        } else {
            Ok(CheckStatus::Idle)
        }
    }
}
