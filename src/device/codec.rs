//! Payload formats and the per-device codec registry.
//!
//! A format name (the `<format>` segment of a topic) maps to at most one encoder
//! and at most one decoder. `json` and `text` are registered for every new
//! device; applications can add, replace or remove formats at any time.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::CodecError;

/// Format name of the built-in JSON codec.
pub const JSON_FORMAT: &str = "json";

/// Format name of the built-in text codec.
pub const TEXT_FORMAT: &str = "text";

/// A message payload, before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured data.
    Json(serde_json::Value),
    /// A UTF-8 string.
    Text(String),
    /// Opaque bytes, e.g. an inbound message with no decoder for its format.
    Bytes(Vec<u8>),
}

impl Payload {
    /// The payload's own byte form, used when no encoder is registered.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Json(value) => value.to_string().into_bytes(),
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Bytes(bytes) => bytes.clone(),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.into())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// Turns a payload into wire bytes.
pub trait Encoder {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError>;
}

/// Turns wire bytes into a payload.
pub trait Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError>;
}

impl<F> Encoder for F
where
    F: Fn(&Payload) -> Result<Vec<u8>, CodecError>,
{
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        self(payload)
    }
}

impl<F> Decoder for F
where
    F: Fn(&[u8]) -> Result<Payload, CodecError>,
{
    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        self(bytes)
    }
}

/// JSON documents as UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Encoder for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        match payload {
            Payload::Json(value) => {
                serde_json::to_vec(value).map_err(|_| CodecError::UnsupportedPayload)
            }
            Payload::Text(text) => {
                serde_json::to_vec(text).map_err(|_| CodecError::UnsupportedPayload)
            }
            Payload::Bytes(_) => Err(CodecError::UnsupportedPayload),
        }
    }
}

impl Decoder for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        let text = core::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        serde_json::from_str(text)
            .map(Payload::Json)
            .map_err(|_| CodecError::InvalidJson)
    }
}

/// Plain UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Encoder for TextCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        match payload {
            Payload::Bytes(bytes) if core::str::from_utf8(bytes).is_err() => {
                Err(CodecError::InvalidUtf8)
            }
            other => Ok(other.to_bytes()),
        }
    }
}

impl Decoder for TextCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        core::str::from_utf8(bytes)
            .map(|text| Payload::Text(text.into()))
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Encoders and decoders keyed by format name. Last registration wins.
pub struct CodecRegistry {
    encoders: BTreeMap<String, Box<dyn Encoder>>,
    decoders: BTreeMap<String, Box<dyn Decoder>>,
}

impl CodecRegistry {
    /// An empty registry, without the built-in formats.
    pub fn empty() -> Self {
        Self {
            encoders: BTreeMap::new(),
            decoders: BTreeMap::new(),
        }
    }

    /// A registry with `json` and `text` registered in both directions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_encoder(JSON_FORMAT, JsonCodec);
        registry.register_decoder(JSON_FORMAT, JsonCodec);
        registry.register_encoder(TEXT_FORMAT, TextCodec);
        registry.register_decoder(TEXT_FORMAT, TextCodec);
        registry
    }

    pub fn register_encoder(&mut self, name: &str, encoder: impl Encoder + 'static) {
        self.encoders.insert(name.into(), Box::new(encoder));
    }

    pub fn register_decoder(&mut self, name: &str, decoder: impl Decoder + 'static) {
        self.decoders.insert(name.into(), Box::new(decoder));
    }

    /// Removes the encoder for `name`, if any.
    pub fn unregister_encoder(&mut self, name: &str) {
        self.encoders.remove(name);
    }

    /// Removes the decoder for `name`, if any.
    pub fn unregister_decoder(&mut self, name: &str) {
        self.decoders.remove(name);
    }

    pub fn encoder(&self, name: &str) -> Option<&dyn Encoder> {
        self.encoders.get(name).map(|e| e.as_ref())
    }

    pub fn decoder(&self, name: &str) -> Option<&dyn Decoder> {
        self.decoders.get(name).map(|d| d.as_ref())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
