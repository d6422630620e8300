//! Session event wire schema and CBOR encoding.
//!
//! An encoded event is a definite-length map `{v, type, body}`. `type` is the
//! payload kind; `body` carries the sequencing fields plus the payload's own
//! fields. `Direction` is local bookkeeping and never crosses the wire.

use std::collections::BTreeMap;
use std::convert::Infallible;

use bytes::Bytes;
use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::core::{
    CounterpartyRef, Direction, ErrorCause, ErrorCode, InitPayload, Limits, Seq0, Seq1,
    SessionEvent, SessionId, SessionPayload,
};

pub const WIRE_VERSION_V1: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PayloadType {
    Init,
    Data,
    Ack,
    Close,
    Error,
}

impl PayloadType {
    fn as_str(self) -> &'static str {
        match self {
            PayloadType::Init => "init",
            PayloadType::Data => "data",
            PayloadType::Ack => "ack",
            PayloadType::Close => "close",
            PayloadType::Error => "error",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init" => Some(PayloadType::Init),
            "data" => Some(PayloadType::Data),
            "ack" => Some(PayloadType::Ack),
            "close" => Some(PayloadType::Close),
            "error" => Some(PayloadType::Error),
            _ => None,
        }
    }

    fn of(payload: &SessionPayload) -> Self {
        match payload {
            SessionPayload::Init(_) => PayloadType::Init,
            SessionPayload::Data(_) => PayloadType::Data,
            SessionPayload::Ack => PayloadType::Ack,
            SessionPayload::Close => PayloadType::Close,
            SessionPayload::Error(_) => PayloadType::Error,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<Infallible>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decode limit exceeded: {0}")]
    DecodeLimit(&'static str),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(String),
    #[error("unsupported wire version {got}")]
    UnsupportedVersion { got: u32 },
    #[error("trailing bytes after event")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

impl DecodeError {
    /// Cause to report back to the sender when the session is identifiable.
    pub fn as_error_cause(&self) -> ErrorCause {
        let message = match self {
            DecodeError::DecodeLimit(limit) => format!("event exceeds {limit}"),
            DecodeError::IndefiniteLength => "indefinite-length CBOR".to_string(),
            DecodeError::TrailingBytes => "trailing bytes".to_string(),
            other => other.to_string(),
        };
        ErrorCause::new(ErrorCode::MalformedEvent, message)
    }
}

pub fn encode_event(event: &SessionEvent) -> Result<Vec<u8>, EncodeError> {
    let payload_type = PayloadType::of(&event.payload);
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("v")?;
    enc.u32(WIRE_VERSION_V1)?;
    enc.str("type")?;
    enc.str(payload_type.as_str())?;
    enc.str("body")?;
    encode_body(&mut enc, event)?;
    Ok(buf)
}

pub fn decode_event(bytes: &[u8], limits: &Limits) -> Result<SessionEvent, DecodeError> {
    let mut dec = Decoder::new(bytes);
    let map_len = decode_map_len(&mut dec, limits, 0)?;

    let mut version = None;
    let mut payload_type = None;
    let mut body_span = None;

    for _ in 0..map_len {
        let key = decode_text(&mut dec, limits)?;
        match key {
            "v" => version = Some(decode_u32(&mut dec, "v")?),
            "type" => {
                let raw = decode_text(&mut dec, limits)?;
                payload_type = Some(
                    PayloadType::parse(raw)
                        .ok_or_else(|| DecodeError::UnknownPayloadType(raw.to_string()))?,
                );
            }
            "body" => {
                if is_indefinite(&dec)? {
                    return Err(DecodeError::IndefiniteLength);
                }
                let start = dec.position();
                dec.skip()?;
                body_span = Some((start, dec.position()));
            }
            _ => skip_value(&mut dec)?,
        }
    }

    if dec.datatype().is_ok() {
        return Err(DecodeError::TrailingBytes);
    }

    let version = version.ok_or(DecodeError::MissingField("v"))?;
    if version != WIRE_VERSION_V1 {
        return Err(DecodeError::UnsupportedVersion { got: version });
    }
    let payload_type = payload_type.ok_or(DecodeError::MissingField("type"))?;
    let (start, end) = body_span.ok_or(DecodeError::MissingField("body"))?;

    let mut body = Decoder::new(&bytes[start..end]);
    let event = decode_body(&mut body, payload_type, limits)?;
    if body.datatype().is_ok() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(event)
}

fn encode_body(enc: &mut Encoder<&mut Vec<u8>>, event: &SessionEvent) -> Result<(), EncodeError> {
    let mut len = 4;
    if !event.out_of_order_sequence_nums.is_empty() {
        len += 1;
    }
    len += match &event.payload {
        SessionPayload::Init(init) if init.context.is_empty() => 2,
        SessionPayload::Init(_) => 3,
        SessionPayload::Data(_) => 1,
        SessionPayload::Ack | SessionPayload::Close => 0,
        SessionPayload::Error(_) => 2,
    };

    enc.map(len)?;
    enc.str("session_id")?;
    enc.str(event.session_id.as_str())?;
    enc.str("ts")?;
    enc.u64(event.timestamp_ms)?;
    enc.str("seq")?;
    enc.u64(event.sequence_num.get())?;
    enc.str("recv")?;
    enc.u64(event.received_sequence_num.get())?;
    if !event.out_of_order_sequence_nums.is_empty() {
        enc.str("ooo")?;
        enc.array(event.out_of_order_sequence_nums.len() as u64)?;
        for seq in &event.out_of_order_sequence_nums {
            enc.u64(seq.get())?;
        }
    }

    match &event.payload {
        SessionPayload::Init(init) => {
            enc.str("protocol")?;
            enc.str(&init.protocol)?;
            enc.str("initiator")?;
            encode_counterparty(enc, &init.initiator)?;
            if !init.context.is_empty() {
                enc.str("context")?;
                enc.map(init.context.len() as u64)?;
                for (key, value) in &init.context {
                    enc.str(key)?;
                    enc.str(value)?;
                }
            }
        }
        SessionPayload::Data(bytes) => {
            enc.str("data")?;
            enc.bytes(bytes)?;
        }
        SessionPayload::Ack | SessionPayload::Close => {}
        SessionPayload::Error(cause) => {
            enc.str("code")?;
            enc.str(cause.code.as_str())?;
            enc.str("message")?;
            enc.str(&cause.message)?;
        }
    }
    Ok(())
}

fn decode_body(
    dec: &mut Decoder,
    payload_type: PayloadType,
    limits: &Limits,
) -> Result<SessionEvent, DecodeError> {
    let map_len = decode_map_len(dec, limits, 1)?;

    let mut session_id = None;
    let mut timestamp_ms = None;
    let mut seq = None;
    let mut recv = None;
    let mut ooo = Vec::new();
    let mut protocol = None;
    let mut initiator = None;
    let mut context = BTreeMap::new();
    let mut data = None;
    let mut code = None;
    let mut message = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "session_id" => {
                let raw = decode_text(dec, limits)?;
                session_id = Some(SessionId::new(raw).map_err(|e| DecodeError::InvalidField {
                    field: "session_id",
                    reason: e.to_string(),
                })?);
            }
            "ts" => timestamp_ms = Some(dec.u64()?),
            "seq" => seq = Some(Seq0::new(dec.u64()?)),
            "recv" => recv = Some(Seq0::new(dec.u64()?)),
            "ooo" => ooo = decode_seq_list(dec, limits)?,
            "protocol" => protocol = Some(decode_text(dec, limits)?.to_string()),
            "initiator" => initiator = Some(decode_counterparty(dec, limits)?),
            "context" => context = decode_context(dec, limits)?,
            "data" => {
                data = Some(Bytes::copy_from_slice(decode_bytes(dec, limits, "data")?));
            }
            "code" => code = Some(ErrorCode::parse(decode_text(dec, limits)?)),
            "message" => message = Some(decode_text(dec, limits)?.to_string()),
            _ => skip_value(dec)?,
        }
    }

    let payload = match payload_type {
        PayloadType::Init => SessionPayload::Init(InitPayload {
            protocol: protocol.ok_or(DecodeError::MissingField("protocol"))?,
            initiator: initiator.ok_or(DecodeError::MissingField("initiator"))?,
            context,
        }),
        PayloadType::Data => SessionPayload::Data(data.ok_or(DecodeError::MissingField("data"))?),
        PayloadType::Ack => SessionPayload::Ack,
        PayloadType::Close => SessionPayload::Close,
        PayloadType::Error => SessionPayload::Error(ErrorCause {
            code: code.ok_or(DecodeError::MissingField("code"))?,
            message: message.unwrap_or_default(),
        }),
    };

    Ok(SessionEvent {
        session_id: session_id.ok_or(DecodeError::MissingField("session_id"))?,
        direction: Direction::Inbound,
        timestamp_ms: timestamp_ms.ok_or(DecodeError::MissingField("ts"))?,
        sequence_num: seq.ok_or(DecodeError::MissingField("seq"))?,
        received_sequence_num: recv.ok_or(DecodeError::MissingField("recv"))?,
        out_of_order_sequence_nums: ooo,
        payload,
    })
}

fn encode_counterparty(
    enc: &mut Encoder<&mut Vec<u8>>,
    counterparty: &CounterpartyRef,
) -> Result<(), EncodeError> {
    let len = if counterparty.endpoint.is_some() { 2 } else { 1 };
    enc.map(len)?;
    enc.str("party")?;
    enc.str(&counterparty.party)?;
    if let Some(endpoint) = &counterparty.endpoint {
        enc.str("endpoint")?;
        enc.str(endpoint)?;
    }
    Ok(())
}

fn decode_counterparty(dec: &mut Decoder, limits: &Limits) -> Result<CounterpartyRef, DecodeError> {
    let map_len = decode_map_len(dec, limits, 2)?;
    let mut party = None;
    let mut endpoint = None;
    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "party" => party = Some(decode_text(dec, limits)?),
            "endpoint" => endpoint = Some(decode_text(dec, limits)?.to_string()),
            _ => skip_value(dec)?,
        }
    }
    let party = party.ok_or(DecodeError::MissingField("party"))?;
    let counterparty = CounterpartyRef::new(party).map_err(|e| DecodeError::InvalidField {
        field: "party",
        reason: e.to_string(),
    })?;
    Ok(match endpoint {
        Some(endpoint) => counterparty.with_endpoint(endpoint),
        None => counterparty,
    })
}

fn decode_context(
    dec: &mut Decoder,
    limits: &Limits,
) -> Result<BTreeMap<String, String>, DecodeError> {
    let map_len = decode_map_len(dec, limits, 2)?;
    let mut out = BTreeMap::new();
    for _ in 0..map_len {
        let key = decode_text(dec, limits)?.to_string();
        let value = decode_text(dec, limits)?.to_string();
        out.insert(key, value);
    }
    Ok(out)
}

fn decode_seq_list(dec: &mut Decoder, limits: &Limits) -> Result<Vec<Seq1>, DecodeError> {
    let len = decode_array_len(dec, limits, 2)?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let raw = dec.u64()?;
        let seq = Seq1::from_u64(raw).ok_or_else(|| DecodeError::InvalidField {
            field: "ooo",
            reason: "sequence number 0 in selective ack".into(),
        })?;
        out.push(seq);
    }
    Ok(out)
}

fn decode_map_len(dec: &mut Decoder, limits: &Limits, depth: usize) -> Result<usize, DecodeError> {
    ensure_depth(limits, depth)?;
    let Some(len) = dec.map()? else {
        return Err(DecodeError::IndefiniteLength);
    };
    if len > limits.max_cbor_map_entries as u64 {
        return Err(DecodeError::DecodeLimit("max_cbor_map_entries"));
    }
    usize::try_from(len).map_err(|_| DecodeError::DecodeLimit("max_cbor_map_entries"))
}

fn decode_array_len(
    dec: &mut Decoder,
    limits: &Limits,
    depth: usize,
) -> Result<usize, DecodeError> {
    ensure_depth(limits, depth)?;
    let Some(len) = dec.array()? else {
        return Err(DecodeError::IndefiniteLength);
    };
    if len > limits.max_cbor_array_entries as u64 {
        return Err(DecodeError::DecodeLimit("max_cbor_array_entries"));
    }
    usize::try_from(len).map_err(|_| DecodeError::DecodeLimit("max_cbor_array_entries"))
}

fn decode_text<'a>(dec: &mut Decoder<'a>, limits: &Limits) -> Result<&'a str, DecodeError> {
    if matches!(dec.datatype()?, Type::StringIndef) {
        return Err(DecodeError::IndefiniteLength);
    }
    let s = dec.str()?;
    if s.len() > limits.max_cbor_text_string_len {
        return Err(DecodeError::DecodeLimit("max_cbor_text_string_len"));
    }
    Ok(s)
}

fn decode_bytes<'a>(
    dec: &mut Decoder<'a>,
    limits: &Limits,
    field: &'static str,
) -> Result<&'a [u8], DecodeError> {
    if matches!(dec.datatype()?, Type::BytesIndef) {
        return Err(DecodeError::IndefiniteLength);
    }
    let bytes = dec.bytes()?;
    if bytes.len() > limits.max_cbor_bytes_string_len {
        return Err(DecodeError::InvalidField {
            field,
            reason: "bytes length exceeds limit".into(),
        });
    }
    Ok(bytes)
}

fn decode_u32(dec: &mut Decoder, field: &'static str) -> Result<u32, DecodeError> {
    let value = dec.u64()?;
    u32::try_from(value).map_err(|_| DecodeError::InvalidField {
        field,
        reason: format!("value {value} out of range for u32"),
    })
}

fn skip_value(dec: &mut Decoder) -> Result<(), DecodeError> {
    if is_indefinite(dec)? {
        return Err(DecodeError::IndefiniteLength);
    }
    dec.skip()?;
    Ok(())
}

fn ensure_depth(limits: &Limits, depth: usize) -> Result<(), DecodeError> {
    if depth > limits.max_cbor_depth {
        return Err(DecodeError::DecodeLimit("max_cbor_depth"));
    }
    Ok(())
}

fn is_indefinite(dec: &Decoder) -> Result<bool, DecodeError> {
    Ok(matches!(
        dec.datatype()?,
        Type::BytesIndef | Type::StringIndef | Type::ArrayIndef | Type::MapIndef
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: SessionPayload) -> SessionEvent {
        SessionEvent {
            session_id: SessionId::new("flow-7").unwrap(),
            direction: Direction::Inbound,
            timestamp_ms: 1_700_000_000_000,
            sequence_num: Seq0::new(4),
            received_sequence_num: Seq0::new(2),
            out_of_order_sequence_nums: vec![Seq1::from_u64(4).unwrap(), Seq1::from_u64(6).unwrap()],
            payload,
        }
    }

    fn roundtrip(ev: &SessionEvent) -> SessionEvent {
        let bytes = encode_event(ev).unwrap_or_else(|e| panic!("encode failed: {e}"));
        decode_event(&bytes, &Limits::default()).unwrap_or_else(|e| panic!("decode failed: {e}"))
    }

    #[test]
    fn every_payload_kind_survives_the_wire() {
        let mut init = InitPayload::new(
            "payments",
            CounterpartyRef::new("O=Alice").unwrap().with_endpoint("bus://alice"),
        );
        init.context.insert("flow".into(), "Settle".into());
        for payload in [
            SessionPayload::Init(init),
            SessionPayload::Data(Bytes::from_static(b"\x00\x01hello")),
            SessionPayload::Ack,
            SessionPayload::Close,
            SessionPayload::Error(ErrorCause::new(ErrorCode::CloseWithGap, "gap at 3")),
        ] {
            let ev = event(payload);
            assert_eq!(roundtrip(&ev), ev);
        }
    }

    #[test]
    fn direction_is_not_encoded() {
        let mut ev = event(SessionPayload::Close);
        ev.direction = Direction::Outbound;
        assert_eq!(roundtrip(&ev).direction, Direction::Inbound);
    }

    #[test]
    fn unknown_error_codes_pass_through() {
        let ev = event(SessionPayload::Error(ErrorCause::new(
            ErrorCode::Unknown("newer_code".into()),
            "?",
        )));
        assert_eq!(roundtrip(&ev), ev);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode_event(&event(SessionPayload::Ack)).unwrap();
        bytes.push(0x00);
        let err = decode_event(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::TrailingBytes));
        assert_eq!(err.as_error_cause().code, ErrorCode::MalformedEvent);
    }

    #[test]
    fn rejects_indefinite_maps() {
        // {_ "v": 1}
        let bytes = [0xbf, 0x61, b'v', 0x01, 0xff];
        let err = decode_event(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::IndefiniteLength));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap().u32(9).unwrap();
        enc.str("type").unwrap().str("ack").unwrap();
        enc.str("body").unwrap().map(0).unwrap();
        let err = decode_event(&buf, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion { got: 9 }));
    }

    #[test]
    fn rejects_zero_in_selective_ack() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap().u32(WIRE_VERSION_V1).unwrap();
        enc.str("type").unwrap().str("ack").unwrap();
        enc.str("body").unwrap().map(5).unwrap();
        enc.str("session_id").unwrap().str("s").unwrap();
        enc.str("ts").unwrap().u64(0).unwrap();
        enc.str("seq").unwrap().u64(0).unwrap();
        enc.str("recv").unwrap().u64(0).unwrap();
        enc.str("ooo").unwrap().array(1).unwrap().u64(0).unwrap();
        let err = decode_event(&buf, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "ooo", .. }));
    }

    #[test]
    fn enforces_data_limit() {
        let limits = Limits {
            max_cbor_bytes_string_len: 4,
            ..Limits::default()
        };
        let bytes = encode_event(&event(SessionPayload::Data(Bytes::from_static(b"12345")))).unwrap();
        let err = decode_event(&bytes, &limits).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "data", .. }));
    }

    #[test]
    fn missing_fields_are_named() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap().u32(WIRE_VERSION_V1).unwrap();
        enc.str("type").unwrap().str("data").unwrap();
        enc.str("body").unwrap().map(4).unwrap();
        enc.str("session_id").unwrap().str("s").unwrap();
        enc.str("ts").unwrap().u64(0).unwrap();
        enc.str("seq").unwrap().u64(1).unwrap();
        enc.str("recv").unwrap().u64(0).unwrap();
        let err = decode_event(&buf, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("data")));
    }
}
