//! Response envelope decoding.
//!
//! A response frame carries a msgpack header map (code, sync, schema id)
//! followed by an optional body map (data or error). [`decode_response`]
//! produces the envelope the correlation layer dispatches on;
//! [`encode_response`] is the inverse, used by test servers.

use bytes::{BufMut, Bytes, BytesMut};
use rmpv::Value;

use crate::constants::{body_key, header_key};
use crate::WireError;

/// Decoded response envelope
#[derive(Debug, Clone)]
pub struct Response {
    /// Request id this response answers
    pub sync: u32,
    /// Status code, zero on success
    pub code: u32,
    /// Schema version observed by the server when answering
    pub schema_id: u32,
    /// Result rows on success
    pub data: Option<Value>,
    /// Server error message on failure
    pub error: Option<String>,
}

impl Response {
    /// Whether the server reported success
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// Decode a response frame (without the length prefix).
pub fn decode_response(frame: &[u8]) -> Result<Response, WireError> {
    let mut cursor = std::io::Cursor::new(frame);
    let header = rmpv::decode::read_value(&mut cursor)?;
    let entries = match header {
        Value::Map(entries) => entries,
        _ => return Err(WireError::Malformed),
    };

    let mut code = None;
    let mut sync = None;
    let mut schema_id = 0;
    for (k, v) in &entries {
        match k.as_u64() {
            Some(header_key::CODE) => code = v.as_u64(),
            Some(header_key::SYNC) => sync = v.as_u64(),
            Some(header_key::SCHEMA_ID) => schema_id = v.as_u64().unwrap_or(0) as u32,
            _ => {}
        }
    }
    let code = code.ok_or(WireError::Malformed)? as u32;
    let sync = sync.ok_or(WireError::Malformed)? as u32;

    let mut data = None;
    let mut error = None;
    if (cursor.position() as usize) < frame.len() {
        if let Value::Map(entries) = rmpv::decode::read_value(&mut cursor)? {
            for (k, v) in entries {
                match k.as_u64() {
                    Some(body_key::DATA) => data = Some(v),
                    Some(body_key::ERROR) => error = v.as_str().map(str::to_string),
                    _ => {}
                }
            }
        }
    }

    Ok(Response {
        sync,
        code,
        schema_id,
        data,
        error,
    })
}

/// Encode a complete response frame, length prefix included. The driver
/// never sends responses; this exists for test servers and tooling.
pub fn encode_response(
    sync: u32,
    code: u32,
    schema_id: u32,
    data: Option<Value>,
    error: Option<&str>,
) -> Result<Bytes, WireError> {
    let header = Value::Map(vec![
        (Value::from(header_key::CODE), Value::from(code)),
        (Value::from(header_key::SYNC), Value::from(sync)),
        (Value::from(header_key::SCHEMA_ID), Value::from(schema_id)),
    ]);

    let mut body_entries = Vec::new();
    if let Some(data) = data {
        body_entries.push((Value::from(body_key::DATA), data));
    }
    if let Some(error) = error {
        body_entries.push((Value::from(body_key::ERROR), Value::from(error)));
    }

    let mut payload = Vec::with_capacity(64);
    rmpv::encode::write_value(&mut payload, &header)?;
    if !body_entries.is_empty() {
        rmpv::encode::write_value(&mut payload, &Value::Map(body_entries))?;
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_prefix(frame: &Bytes) -> &[u8] {
        &frame[4..]
    }

    #[test]
    fn test_success_roundtrip() {
        let rows = Value::Array(vec![Value::Array(vec![Value::from(1), Value::from("a")])]);
        let frame = encode_response(7, 0, 3, Some(rows.clone()), None).unwrap();
        let resp = decode_response(strip_prefix(&frame)).unwrap();
        assert!(resp.ok());
        assert_eq!(resp.sync, 7);
        assert_eq!(resp.schema_id, 3);
        assert_eq!(resp.data, Some(rows));
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_error_roundtrip() {
        let frame = encode_response(8, 0x8012, 3, None, Some("no such space")).unwrap();
        let resp = decode_response(strip_prefix(&frame)).unwrap();
        assert!(!resp.ok());
        assert_eq!(resp.code, 0x8012);
        assert_eq!(resp.error.as_deref(), Some("no such space"));
    }

    #[test]
    fn test_empty_body() {
        let frame = encode_response(9, 0, 1, None, None).unwrap();
        let resp = decode_response(strip_prefix(&frame)).unwrap();
        assert!(resp.ok());
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_missing_sync_is_malformed() {
        // Header map with only a code key.
        let header = Value::Map(vec![(Value::from(header_key::CODE), Value::from(0u32))]);
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &header).unwrap();
        assert!(matches!(
            decode_response(&payload),
            Err(WireError::Malformed)
        ));
    }
}
