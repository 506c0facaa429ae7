//! Order request encoding and response decoding.
//!
//! Requests use a fixed-schema binary layout: the fields are written in declaration order,
//! integers and floats big-endian, strings as a LEB128 length followed by their UTF-8 bytes.
//! Responses are JSON objects carrying the echoed sequence number `c` and the server's
//! `received_time`.

use crate::error::Error;
use crate::message::Message;
use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use serde_json::Value;

/// Sequence number reserved for the heartbeat, never assigned to a round request.
pub const HEARTBEAT_SEQUENCE: u32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub c: u32,
    pub ts: String,
    pub txn_typ: String,
    pub exch: String,
    pub qty: u32,
    pub sym: String,
    pub prc: f32,
    pub od_typ: String,
    pub tag: String,
    pub source: String,
    pub mkt_type: String,
    pub val: String,
    pub segmt: String,
    pub trprc: f32,
    pub var: String,
    pub pdt: String,
    pub disqty: i16,
    pub tarprc: f32,
}

impl Default for OrderRequest {
    fn default() -> Self {
        Self {
            c: 0,
            ts: "0".into(),
            txn_typ: "B".into(),
            exch: "NSE".into(),
            qty: 1000,
            sym: "IDBI".into(),
            prc: 1011.46,
            od_typ: "L".into(),
            tag: "Sample".into(),
            source: "M".into(),
            mkt_type: "N".into(),
            val: "IOC".into(),
            segmt: "E".into(),
            trprc: 1022.56,
            var: "AMO".into(),
            pdt: "CNC".into(),
            disqty: 100,
            tarprc: 1100.03,
        }
    }
}

impl OrderRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(96);
        buf.put_u32(self.c);
        put_str(&mut buf, &self.ts);
        put_str(&mut buf, &self.txn_typ);
        put_str(&mut buf, &self.exch);
        buf.put_u32(self.qty);
        put_str(&mut buf, &self.sym);
        buf.put_f32(self.prc);
        put_str(&mut buf, &self.od_typ);
        put_str(&mut buf, &self.tag);
        put_str(&mut buf, &self.source);
        put_str(&mut buf, &self.mkt_type);
        put_str(&mut buf, &self.val);
        put_str(&mut buf, &self.segmt);
        buf.put_f32(self.trprc);
        put_str(&mut buf, &self.var);
        put_str(&mut buf, &self.pdt);
        buf.put_i16(self.disqty);
        buf.put_f32(self.tarprc);
        buf.to_vec()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            c: get_u32(&mut buf, "c")?,
            ts: get_str(&mut buf, "ts")?,
            txn_typ: get_str(&mut buf, "txnTyp")?,
            exch: get_str(&mut buf, "exch")?,
            qty: get_u32(&mut buf, "qty")?,
            sym: get_str(&mut buf, "sym")?,
            prc: get_f32(&mut buf, "prc")?,
            od_typ: get_str(&mut buf, "odTyp")?,
            tag: get_str(&mut buf, "tag")?,
            source: get_str(&mut buf, "source")?,
            mkt_type: get_str(&mut buf, "mktType")?,
            val: get_str(&mut buf, "val")?,
            segmt: get_str(&mut buf, "segmt")?,
            trprc: get_f32(&mut buf, "trprc")?,
            var: get_str(&mut buf, "var")?,
            pdt: get_str(&mut buf, "pdt")?,
            disqty: {
                ensure(&buf, 2, "disqty")?;
                buf.get_i16()
            },
            tarprc: get_f32(&mut buf, "tarprc")?,
        })
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    let mut len = value.len();
    while len >= 0x80 {
        buf.put_u8((len as u8 & 0x7F) | 0x80);
        len >>= 7;
    }
    buf.put_u8(len as u8);
    buf.put_slice(value.as_bytes());
}

fn ensure(buf: &&[u8], needed: usize, field: &'static str) -> Result<(), Error> {
    if buf.remaining() < needed {
        return Err(Error::PayloadTruncated(field));
    }
    Ok(())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, Error> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32())
}

fn get_f32(buf: &mut &[u8], field: &'static str) -> Result<f32, Error> {
    ensure(buf, 4, field)?;
    Ok(buf.get_f32())
}

fn get_str(buf: &mut &[u8], field: &'static str) -> Result<String, Error> {
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        ensure(buf, 1, field)?;
        let byte = buf.get_u8();
        len |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            return Err(Error::PayloadTruncated(field));
        }
    }
    ensure(buf, len, field)?;
    let value = String::from_utf8(buf[..len].to_vec())?;
    buf.advance(len);
    Ok(value)
}

/// Produces the bytes of the request carrying a given sequence number.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, sequence: u32) -> Message;
}

/// Sends the same order every time, only the sequence number changes.
#[derive(Debug, Clone, Default)]
pub struct OrderEncoder {
    template: OrderRequest,
}

impl OrderEncoder {
    pub fn new(template: OrderRequest) -> Self {
        Self { template }
    }
}

impl PayloadEncoder for OrderEncoder {
    fn encode(&self, sequence: u32) -> Message {
        let mut order = self.template.clone();
        order.c = sequence;
        Message::Binary(order.encode())
    }
}

pub fn heartbeat() -> Message {
    Message::Text(format!("{{\"c\":{}}}", HEARTBEAT_SEQUENCE))
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    c: u64,
    #[serde(default)]
    received_time: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    pub sequence: u64,
    /// Server processing time, epoch milliseconds.
    pub received_time: Option<u64>,
}

impl Response {
    pub fn parse(message: &Message) -> Result<Self, Error> {
        let raw: RawResponse = serde_json::from_slice(message.as_binary())?;

        // Servers written in different languages report the timestamp as an integer, a float
        // or a numeric string
        let received_time = match raw.received_time {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().map(|millis| millis.round() as u64)),
            Value::String(text) => text.trim().parse::<f64>().ok().map(|millis| millis.round() as u64),
            _ => None,
        };

        Ok(Self {
            sequence: raw.c,
            received_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_layout() {
        let order = OrderRequest {
            c: 7,
            ..OrderRequest::default()
        };
        let bytes = order.encode();

        // c is first, as a big-endian u32, and the first string is "0" prefixed by its length
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[4..6], &[1, b'0']);
        assert_eq!(OrderRequest::decode(&bytes).unwrap(), order);
    }

    #[test]
    fn test_long_string_length_prefix() {
        let order = OrderRequest {
            tag: "x".repeat(300),
            ..OrderRequest::default()
        };
        let decoded = OrderRequest::decode(&order.encode()).unwrap();
        assert_eq!(decoded.tag.len(), 300);
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = OrderRequest::default().encode();
        let result = OrderRequest::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(Error::PayloadTruncated("tarprc"))));
    }

    #[test]
    fn test_encoder_sets_sequence() {
        let message = OrderEncoder::default().encode(42);
        let order = OrderRequest::decode(message.as_binary()).unwrap();
        assert_eq!(order.c, 42);
        assert_eq!(order.sym, "IDBI");
    }

    #[test]
    fn test_response_timestamp_forms() {
        let as_int = Response::parse(&Message::Text(r#"{"c":3,"received_time":1700000000123}"#.into())).unwrap();
        assert_eq!(as_int.sequence, 3);
        assert_eq!(as_int.received_time, Some(1700000000123));

        let as_float = Response::parse(&Message::Text(r#"{"c":4,"received_time":12.6}"#.into())).unwrap();
        assert_eq!(as_float.received_time, Some(13));

        let as_string = Response::parse(&Message::Text(r#"{"c":5,"received_time":"99"}"#.into())).unwrap();
        assert_eq!(as_string.received_time, Some(99));

        let missing = Response::parse(&Message::Binary(br#"{"c":6}"#.to_vec())).unwrap();
        assert_eq!(missing.received_time, None);
    }

    #[test]
    fn test_response_not_json() {
        assert!(Response::parse(&Message::Text("pong".into())).is_err());
    }

    #[test]
    fn test_heartbeat_uses_reserved_sequence() {
        let response = Response::parse(&heartbeat()).unwrap();
        assert_eq!(response.sequence, HEARTBEAT_SEQUENCE as u64);
    }
}
