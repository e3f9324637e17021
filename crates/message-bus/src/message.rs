//! # Message
//!
//! The unit of exchange between microservices, with its versioned binary
//! layout and its JSON projection.
//!
//! ## Wire Layout (big-endian)
//!
//! ```text
//! version:i16
//! id:str16 tag:str16 groupid:str16
//! sequencenumber:i32 sequencetotal:i32 priority:u8 timestamp:i64
//! publisher:str16 authid:str16 authgroup:str16
//! chainposition:i64 hash:str16 previoushash:str16 nonce:str16
//! difficultytarget:i32 infotype:str16 infoformat:str16
//! contextdata:blob32 contentdata:blob32
//! ```
//!
//! `str16` is a `u16` byte length followed by UTF-8 bytes, `blob32` is a `u32`
//! byte length followed by raw bytes. Bytes after `contentdata` are ignored.

use crate::error::CodecError;
use crate::id::current_time_millis;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};

/// Current binary format version, stamped by the encoder.
pub const MESSAGE_VERSION: i16 = 4;

/// A message published by one microservice for the receivers in its route.
///
/// Messages are immutable by convention once handed to the bus: an update is
/// a new message with a new `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: String,
    pub tag: String,
    #[serde(rename = "groupid")]
    pub message_group_id: String,
    #[serde(rename = "sequencenumber")]
    pub sequence_number: i32,
    #[serde(rename = "sequencetotal")]
    pub sequence_total: i32,
    pub priority: u8,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub publisher: String,
    #[serde(rename = "authid")]
    pub auth_identifier: String,
    #[serde(rename = "authgroup")]
    pub auth_group: String,
    #[serde(rename = "chainposition")]
    pub chain_position: i64,
    pub hash: String,
    #[serde(rename = "previoushash")]
    pub previous_hash: String,
    pub nonce: String,
    #[serde(rename = "difficultytarget")]
    pub difficulty_target: i32,
    #[serde(rename = "infotype")]
    pub info_type: String,
    #[serde(rename = "infoformat")]
    pub info_format: String,
    #[serde(rename = "contextdata", with = "base64_bytes")]
    pub context_data: Vec<u8>,
    #[serde(rename = "contentdata", with = "base64_bytes")]
    pub content_data: Vec<u8>,
}

impl Message {
    /// Create an empty message for `publisher`, timestamped now.
    #[must_use]
    pub fn new(publisher: impl Into<String>) -> Self {
        Self {
            publisher: publisher.into(),
            timestamp: current_time_millis(),
            ..Self::default()
        }
    }

    /// Encode to the binary wire format.
    ///
    /// Never fails: an unencodable message is logged and yields an empty
    /// byte vector.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self.try_encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(id = %self.id, publisher = %self.publisher, error = %e, "Message encoding failed");
                Vec::new()
            }
        }
    }

    /// Encode to the binary wire format, reporting oversized fields.
    pub fn try_encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::with_capacity(
            128 + self.context_data.len() + self.content_data.len(),
        );
        w.i16(MESSAGE_VERSION);
        w.str16("id", &self.id)?;
        w.str16("tag", &self.tag)?;
        w.str16("groupid", &self.message_group_id)?;
        w.i32(self.sequence_number);
        w.i32(self.sequence_total);
        w.u8(self.priority);
        w.i64(self.timestamp);
        w.str16("publisher", &self.publisher)?;
        w.str16("authid", &self.auth_identifier)?;
        w.str16("authgroup", &self.auth_group)?;
        w.i64(self.chain_position);
        w.str16("hash", &self.hash)?;
        w.str16("previoushash", &self.previous_hash)?;
        w.str16("nonce", &self.nonce)?;
        w.i32(self.difficulty_target);
        w.str16("infotype", &self.info_type)?;
        w.str16("infoformat", &self.info_format)?;
        w.blob32("contextdata", &self.context_data)?;
        w.blob32("contentdata", &self.content_data)?;
        Ok(w.into_inner())
    }

    /// Decode a message from its binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let version = r.i16()?;
        if version != MESSAGE_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: MESSAGE_VERSION,
            });
        }

        Ok(Self {
            id: r.str16("id")?,
            tag: r.str16("tag")?,
            message_group_id: r.str16("groupid")?,
            sequence_number: r.i32()?,
            sequence_total: r.i32()?,
            priority: r.u8()?,
            timestamp: r.i64()?,
            publisher: r.str16("publisher")?,
            auth_identifier: r.str16("authid")?,
            auth_group: r.str16("authgroup")?,
            chain_position: r.i64()?,
            hash: r.str16("hash")?,
            previous_hash: r.str16("previoushash")?,
            nonce: r.str16("nonce")?,
            difficulty_target: r.i32()?,
            info_type: r.str16("infotype")?,
            info_format: r.str16("infoformat")?,
            context_data: r.blob32()?,
            content_data: r.blob32()?,
        })
    }

    /// Project the message to JSON for the external API layer.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            error!(id = %self.id, error = %e, "Message JSON projection failed");
            serde_json::Value::Null
        })
    }

    /// Rebuild a message from its JSON projection.
    ///
    /// Absent or `null` fields take their defaults; an absent or `null`
    /// `timestamp` is set to now.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CodecError> {
        let mut value = value.clone();
        if let serde_json::Value::Object(fields) = &mut value {
            fields.retain(|_, v| !v.is_null());
        }
        let has_timestamp = value.get("timestamp").is_some();

        let mut message: Self = serde_json::from_value(value).map_err(|e| {
            warn!(error = %e, "Rejected message JSON");
            CodecError::Json(e.to_string())
        })?;
        if !has_timestamp {
            message.timestamp = current_time_millis();
        }
        Ok(message)
    }

    /// Encode to base64 text for text-only envelopes.
    #[must_use]
    pub fn encode_base64(&self) -> String {
        BASE64.encode(self.encode())
    }

    /// Decode a message from base64 text produced by [`Message::encode_base64`].
    pub fn decode_base64(text: &str) -> Result<Self, CodecError> {
        let bytes = BASE64.decode(text.trim()).map_err(|e| {
            warn!(error = %e, "Rejected base64 message payload");
            CodecError::Base64(e.to_string())
        })?;
        Self::decode(&bytes).map_err(|e| {
            warn!(error = %e, "Rejected base64 message body");
            e
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, tag: {}, groupid: {}, sequencenumber: {}, sequencetotal: {}, \
             priority: {}, timestamp: {}, publisher: {}, authid: {}, authgroup: {}, \
             version: {}, chainposition: {}, hash: {}, previoushash: {}, nonce: {}, \
             difficultytarget: {}, infotype: {}, infoformat: {}, contextdata: {} bytes, \
             contentdata: {} bytes }}",
            self.id,
            self.tag,
            self.message_group_id,
            self.sequence_number,
            self.sequence_total,
            self.priority,
            self.timestamp,
            self.publisher,
            self.auth_identifier,
            self.auth_group,
            MESSAGE_VERSION,
            self.chain_position,
            self.hash,
            self.previous_hash,
            self.nonce,
            self.difficulty_target,
            self.info_type,
            self.info_format,
            self.context_data.len(),
            self.content_data.len(),
        )
    }
}

/// Serde adapter carrying byte blobs as base64 strings in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        BASE64.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn str16(&mut self, field: &'static str, v: &str) -> Result<(), CodecError> {
        let len = u16::try_from(v.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: v.len(),
            max: u16::MAX as usize,
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn blob32(&mut self, field: &'static str, v: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(v.len()).map_err(|_| CodecError::FieldTooLong {
            field,
            len: v.len(),
            max: u32::MAX as usize,
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(v);
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
                needed,
                available: self.bytes.len().saturating_sub(self.offset),
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn str16(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = u16::from_be_bytes(self.array()?) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    fn blob32(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = u32::from_be_bytes(self.array()?) as usize;
        Ok(self.take(len)?.to_vec())
    }
}
