//! Topic layout of the Watson IoT device API.
//!
//! Inbound commands arrive on `iot-2/cmd/<command>/fmt/<format>` and outbound
//! events go to `iot-2/evt/<event>/fmt/<format>`. Parsing splits on the fixed
//! literal delimiters; there is no pattern matching and no backtracking.

use core::fmt::Write;

use heapless::String;

/// Wildcard filter the device subscribes to for commands.
pub const COMMAND_TOPIC_FILTER: &str = "iot-2/cmd/+/fmt/+";

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 256;

const COMMAND_PREFIX: &str = "iot-2/cmd/";
const FORMAT_SEPARATOR: &str = "/fmt/";

/// Command name and payload format extracted from an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandRoute<'a> {
    pub command: &'a str,
    pub format: &'a str,
}

/// Why an inbound topic could not be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteError {
    /// The topic is not valid UTF-8.
    InvalidUtf8,
    /// The topic does not start with `iot-2/cmd/`.
    NotACommand,
    /// No `/fmt/` separator follows the command name.
    MissingFormat,
    /// The command or format segment is empty or contains a `/`.
    BadSegment,
}

/// Errors building an outbound event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopicError {
    EmptyEventId,
    EmptyFormat,
    TooLong,
}

/// Routes an inbound topic, given as raw bytes from the session.
pub fn route_command(topic: &[u8]) -> Result<CommandRoute<'_>, RouteError> {
    let topic = core::str::from_utf8(topic).map_err(|_| RouteError::InvalidUtf8)?;
    parse_command_topic(topic)
}

/// Splits `iot-2/cmd/<command>/fmt/<format>` into its two segments.
///
/// The command ends at the first `/fmt/`. Both segments must be non-empty and
/// free of `/`, so a topic carrying a second `/fmt/` is rejected rather than
/// guessed at.
pub fn parse_command_topic(topic: &str) -> Result<CommandRoute<'_>, RouteError> {
    let rest = topic
        .strip_prefix(COMMAND_PREFIX)
        .ok_or(RouteError::NotACommand)?;
    let (command, format) = rest
        .split_once(FORMAT_SEPARATOR)
        .ok_or(RouteError::MissingFormat)?;

    if !is_segment(command) || !is_segment(format) {
        return Err(RouteError::BadSegment);
    }
    Ok(CommandRoute { command, format })
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('/')
}

/// Builds `iot-2/evt/<event>/fmt/<format>`, trimming whitespace around the event id.
pub fn event_topic(event_id: &str, format: &str) -> Result<String<MAX_TOPIC_LEN>, TopicError> {
    let event_id = event_id.trim();
    if event_id.is_empty() {
        return Err(TopicError::EmptyEventId);
    }
    if format.is_empty() {
        return Err(TopicError::EmptyFormat);
    }

    let mut topic = String::new();
    write!(topic, "iot-2/evt/{event_id}/fmt/{format}").map_err(|_| TopicError::TooLong)?;
    Ok(topic)
}
