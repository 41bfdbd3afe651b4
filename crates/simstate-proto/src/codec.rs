//! Wire codecs.
//!
//! A codec turns value trees into frame bytes and back. Envelope and
//! outbound framing is shared by all codecs.

use crate::messages::{Envelope, MessageError, Outbound};
use serde_json::{Map, Number, Value};

/// MessagePack extension type carrying a typed numeric array.
///
/// The extension body is itself a MessagePack `[dtype, shape, bytes]` triple
/// with a little-endian dtype of `<f8`, `<i8` or `|b1`.
pub const NDARRAY_EXT_TYPE: i8 = 42;

/// Binary encoding of value trees.
pub trait Codec {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Encode a value tree.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decode a value tree.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid frame.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Decode an inbound `(targetGroup, topic, senderId, payload)` frame.
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or the frame has the wrong shape.
    fn decode_envelope(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        Ok(Envelope::from_wire(self.decode(bytes)?)?)
    }

    /// Encode an inbound-style frame (used by servers and test peers).
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        self.encode(&envelope.to_wire())
    }

    /// Encode an outbound `(targetGroup, topic, body)` frame.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    fn encode_outbound(&self, outbound: &Outbound) -> Result<Vec<u8>, CodecError> {
        self.encode(&outbound.to_wire())
    }

    /// Decode an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or the frame has the wrong shape.
    fn decode_outbound(&self, bytes: &[u8]) -> Result<Outbound, CodecError> {
        Ok(Outbound::from_wire(self.decode(bytes)?)?)
    }
}

/// MessagePack codec; the format spoken by simulation servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let value = rmpv::decode::read_value(&mut &bytes[..])
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        msgpack_to_json(value)
    }
}

/// Convert a MessagePack value tree, expanding typed arrays.
///
/// Binary strings become sequences of byte values. Map keys that are not
/// strings are rendered with their MessagePack display form.
fn msgpack_to_json(value: rmpv::Value) -> Result<Value, CodecError> {
    Ok(match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(b) => Value::Bool(b),
        rmpv::Value::Integer(int) => match (int.as_u64(), int.as_i64()) {
            (Some(n), _) => Value::from(n),
            (None, Some(n)) => Value::from(n),
            (None, None) => Value::Null,
        },
        rmpv::Value::F32(x) => float(f64::from(x)),
        rmpv::Value::F64(x) => float(x),
        rmpv::Value::String(s) => match s.into_str() {
            Some(s) => Value::String(s),
            None => return Err(CodecError::Decode("invalid UTF-8 string".to_string())),
        },
        rmpv::Value::Binary(bytes) => bytes.into_iter().map(Value::from).collect(),
        rmpv::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(msgpack_to_json)
                .collect::<Result<_, _>>()?,
        ),
        rmpv::Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    rmpv::Value::String(s) if s.is_str() => s.into_str().unwrap_or_default(),
                    other => other.to_string(),
                };
                map.insert(key, msgpack_to_json(value)?);
            }
            Value::Object(map)
        }
        rmpv::Value::Ext(NDARRAY_EXT_TYPE, body) => decode_ndarray(&body)?,
        rmpv::Value::Ext(kind, _) => {
            return Err(CodecError::Decode(format!("unsupported extension type {kind}")));
        }
    })
}

fn float(x: f64) -> Value {
    Number::from_f64(x).map_or(Value::Null, Value::Number)
}

/// Expand a `[dtype, shape, bytes]` extension body into a flat sequence.
fn decode_ndarray(body: &[u8]) -> Result<Value, CodecError> {
    let header = rmpv::decode::read_value(&mut &body[..])
        .map_err(|e| CodecError::Decode(format!("typed array: {e}")))?;
    let malformed = || CodecError::Decode("typed array is not [dtype, shape, bytes]".to_string());

    let rmpv::Value::Array(fields) = header else {
        return Err(malformed());
    };
    let (Some(dtype), Some(rmpv::Value::Binary(data))) =
        (fields.first().and_then(rmpv::Value::as_str), fields.get(2))
    else {
        return Err(malformed());
    };

    match dtype {
        "<f8" => Ok(words(data)?.map(|w| float(f64::from_le_bytes(w))).collect()),
        "<i8" => Ok(words(data)?.map(|w| Value::from(i64::from_le_bytes(w))).collect()),
        "|b1" => Ok(data.iter().map(|b| Value::Bool(*b == 1)).collect()),
        other => Err(CodecError::Decode(format!("unsupported typed array dtype '{other}'"))),
    }
}

fn words(data: &[u8]) -> Result<impl Iterator<Item = [u8; 8]> + '_, CodecError> {
    if data.len() % 8 != 0 {
        return Err(CodecError::Decode(format!(
            "typed array length {} is not a multiple of 8",
            data.len()
        )));
    }
    Ok(data.chunks_exact(8).map(|chunk| {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        word
    }))
}

/// CBOR codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Codec selected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireCodec {
    /// MessagePack
    #[default]
    Msgpack,
    /// CBOR
    Cbor,
}

impl std::str::FromStr for WireCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(Self::Msgpack),
            "cbor" => Ok(Self::Cbor),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }
}

impl Codec for WireCodec {
    fn name(&self) -> &'static str {
        match self {
            Self::Msgpack => MsgpackCodec.name(),
            Self::Cbor => CborCodec.name(),
        }
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Msgpack => MsgpackCodec.encode(value),
            Self::Cbor => CborCodec.encode(value),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match self {
            Self::Msgpack => MsgpackCodec.decode(bytes),
            Self::Cbor => CborCodec.decode(bytes),
        }
    }
}

/// Errors for frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Encoding failed
    #[error("encode failed: {0}")]
    Encode(String),
    /// Decoding failed
    #[error("decode failed: {0}")]
    Decode(String),
    /// Frame decoded but has the wrong shape
    #[error(transparent)]
    Message(#[from] MessageError),
    /// Unknown codec name
    #[error("unsupported codec '{0}'")]
    Unsupported(String),
}
