//! Dual-mode gRPC codec: opaque byte frames with a JSON fallback.
//!
//! The proxy carries every payload as an uninterpreted [`RawMessage::Frame`];
//! JSON-to-binary transcoding is the gateway's job, not ours. Typed messages
//! still work: anything that is not a frame is delegated to the fallback
//! codec, so the same server could serve fully-typed JSON calls as well.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// One RPC message as seen by the proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage<T = Value> {
    /// Payload bytes carried through the gRPC framing untouched.
    Frame(Bytes),
    /// A typed message, encoded and decoded by the fallback codec.
    Typed(T),
}

impl<T> RawMessage<T> {
    /// Wrap raw payload bytes into an opaque frame.
    pub fn frame(payload: impl Into<Bytes>) -> Self {
        RawMessage::Frame(payload.into())
    }

    /// The frame payload, or `None` for a typed message.
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            RawMessage::Frame(payload) => Some(payload),
            RawMessage::Typed(_) => None,
        }
    }
}

/// How the decoder interprets inbound message bytes.
///
/// Encoding always dispatches on the [`RawMessage`] variant; decoding has no
/// type information on the wire, so the mode is fixed when the codec is
/// built. The proxy and its bound client always run in `Opaque` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Store the message bytes into a frame unchanged.
    #[default]
    Opaque,
    /// Delegate to the fallback codec.
    Typed,
}

/// Reports which codec a component negotiates, for observability.
pub trait CodecName {
    /// Human-readable codec name; composites embed their fallback's name.
    fn name(&self) -> String;
}

/// JSON fallback codec over serde values.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec<T = Value, U = Value> {
    _marker: PhantomData<(T, U)>,
}

impl<T, U> Codec for JsonCodec<T, U>
where
    T: Serialize + Send + 'static,
    U: DeserializeOwned + Send + 'static,
{
    type Encode = T;
    type Decode = U;
    type Encoder = JsonEncoder<T>;
    type Decoder = JsonDecoder<U>;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(PhantomData)
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(PhantomData)
    }
}

impl<T, U> CodecName for JsonCodec<T, U> {
    fn name(&self) -> String {
        "json".to_string()
    }
}

#[derive(Debug)]
pub struct JsonEncoder<T>(PhantomData<T>);

impl<T: Serialize> Encoder for JsonEncoder<T> {
    type Item = T;
    type Error = Status;

    fn encode(&mut self, item: T, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put_slice(&encode_json(&item)?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonDecoder<U>(PhantomData<U>);

impl<U: DeserializeOwned> Decoder for JsonDecoder<U> {
    type Item = U;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<U>, Status> {
        let buf = src.copy_to_bytes(src.remaining());
        Ok(Some(decode_json(&buf)?))
    }
}

pub(crate) fn encode_json<T: Serialize>(item: &T) -> Result<Vec<u8>, Status> {
    serde_json::to_vec(item).map_err(|e| Status::internal(format!("failed to encode json message: {e}")))
}

pub(crate) fn decode_json<U: DeserializeOwned>(buf: &[u8]) -> Result<U, Status> {
    serde_json::from_slice(buf).map_err(|e| Status::internal(format!("failed to decode json message: {e}")))
}

/// Codec carrying [`RawMessage`]s: frames pass through unchanged, typed
/// messages go through the fallback codec `C`.
#[derive(Debug, Clone, Default)]
pub struct RawCodec<C = JsonCodec> {
    inner: C,
    mode: DecodeMode,
}

impl<C: Codec + Default> RawCodec<C> {
    /// Codec whose decoder stores inbound bytes into opaque frames.
    pub fn opaque() -> Self {
        Self {
            inner: C::default(),
            mode: DecodeMode::Opaque,
        }
    }

    /// Codec whose decoder delegates to the fallback.
    pub fn typed() -> Self {
        Self {
            inner: C::default(),
            mode: DecodeMode::Typed,
        }
    }

    /// Media type advertised on the HTTP side of the proxy.
    pub fn content_type(&self) -> &'static str {
        "application/json"
    }
}

impl<C: CodecName> CodecName for RawCodec<C> {
    fn name(&self) -> String {
        format!("raw>{}", self.inner.name())
    }
}

impl<C> Codec for RawCodec<C>
where
    C: Codec + Send + 'static,
{
    type Encode = RawMessage<C::Encode>;
    type Decode = RawMessage<C::Decode>;
    type Encoder = RawEncoder<C::Encoder>;
    type Decoder = RawDecoder<C::Decoder>;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder {
            inner: self.inner.encoder(),
        }
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder {
            inner: self.inner.decoder(),
            mode: self.mode,
        }
    }
}

#[derive(Debug)]
pub struct RawEncoder<E> {
    inner: E,
}

impl<E> Encoder for RawEncoder<E>
where
    E: Encoder<Error = Status>,
{
    type Item = RawMessage<E::Item>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        match item {
            RawMessage::Frame(payload) => {
                dst.put(payload);
                Ok(())
            }
            RawMessage::Typed(inner) => self.inner.encode(inner, dst),
        }
    }
}

#[derive(Debug)]
pub struct RawDecoder<D> {
    inner: D,
    mode: DecodeMode,
}

impl<D> Decoder for RawDecoder<D>
where
    D: Decoder<Error = Status>,
{
    type Item = RawMessage<D::Item>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Status> {
        match self.mode {
            DecodeMode::Opaque => {
                let payload = src.copy_to_bytes(src.remaining());
                Ok(Some(RawMessage::Frame(payload)))
            }
            DecodeMode::Typed => Ok(self.inner.decode(src)?.map(RawMessage::Typed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_payload_round_trips_untouched() {
        let payload = b"{\"name\":\"world\"}\x00\xffnot json".to_vec();
        let msg = RawMessage::<Value>::frame(payload.clone());
        assert_eq!(msg.into_payload().unwrap(), Bytes::from(payload));
    }

    #[test]
    fn typed_message_has_no_payload() {
        let msg = RawMessage::Typed(json!({"a": 1}));
        assert!(msg.into_payload().is_none());
    }

    #[test]
    fn json_fallback_round_trips() {
        let value = json!({"message": "Hello world", "n": 3});
        let encoded = encode_json(&value).unwrap();
        let decoded: Value = decode_json(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert!(decode_json::<Value>(b"{not json").is_err());
    }

    #[test]
    fn composite_name_embeds_the_fallback() {
        let codec = RawCodec::<JsonCodec>::opaque();
        assert_eq!(codec.name(), "raw>json");
        assert_eq!(codec.content_type(), "application/json");
    }

    #[test]
    fn default_mode_is_opaque() {
        assert_eq!(DecodeMode::default(), DecodeMode::Opaque);
    }
}
