//! Request frame encoders.
//!
//! Each encoder accepts already-resolved numeric space/index identifiers
//! plus the command arguments and returns complete frame bytes with the
//! request id baked into the header. The connection layer only queues
//! and writes the result.

use bytes::{BufMut, Bytes, BytesMut};
use rmpv::Value;

use crate::constants::{body_key, header_key, IteratorType, RequestCode, AUTH_MECHANISM};
use crate::WireError;

/// Encode a select request.
pub fn select(
    sync: u32,
    space_id: u32,
    index_id: u32,
    limit: u32,
    offset: u32,
    iterator: IteratorType,
    key: Value,
) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::SPACE_ID), Value::from(space_id)),
        (Value::from(body_key::INDEX_ID), Value::from(index_id)),
        (Value::from(body_key::LIMIT), Value::from(limit)),
        (Value::from(body_key::OFFSET), Value::from(offset)),
        (Value::from(body_key::ITERATOR), Value::from(iterator as u8)),
        (Value::from(body_key::KEY), key),
    ]);
    encode(RequestCode::Select, sync, Some(body))
}

/// Encode an insert request.
pub fn insert(sync: u32, space_id: u32, tuple: Value) -> Result<Bytes, WireError> {
    store(RequestCode::Insert, sync, space_id, tuple)
}

/// Encode a replace request.
pub fn replace(sync: u32, space_id: u32, tuple: Value) -> Result<Bytes, WireError> {
    store(RequestCode::Replace, sync, space_id, tuple)
}

/// Encode an update request.
pub fn update(
    sync: u32,
    space_id: u32,
    index_id: u32,
    key: Value,
    ops: Value,
) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::SPACE_ID), Value::from(space_id)),
        (Value::from(body_key::INDEX_ID), Value::from(index_id)),
        (Value::from(body_key::KEY), key),
        (Value::from(body_key::TUPLE), ops),
    ]);
    encode(RequestCode::Update, sync, Some(body))
}

/// Encode a delete request.
pub fn delete(sync: u32, space_id: u32, index_id: u32, key: Value) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::SPACE_ID), Value::from(space_id)),
        (Value::from(body_key::INDEX_ID), Value::from(index_id)),
        (Value::from(body_key::KEY), key),
    ]);
    encode(RequestCode::Delete, sync, Some(body))
}

/// Encode an upsert request.
pub fn upsert(sync: u32, space_id: u32, tuple: Value, ops: Value) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::SPACE_ID), Value::from(space_id)),
        (Value::from(body_key::TUPLE), tuple),
        (Value::from(body_key::OPS), ops),
    ]);
    encode(RequestCode::Upsert, sync, Some(body))
}

/// Encode a stored-function call request.
pub fn call(sync: u32, function: &str, args: Value) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::FUNCTION_NAME), Value::from(function)),
        (Value::from(body_key::TUPLE), args),
    ]);
    encode(RequestCode::Call, sync, Some(body))
}

/// Encode an expression evaluation request.
pub fn eval(sync: u32, expression: &str, args: Value) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::EXPRESSION), Value::from(expression)),
        (Value::from(body_key::TUPLE), args),
    ]);
    encode(RequestCode::Eval, sync, Some(body))
}

/// Encode a ping request. Carries no body.
pub fn ping(sync: u32) -> Result<Bytes, WireError> {
    encode(RequestCode::Ping, sync, None)
}

/// Encode an authentication request carrying the username and the
/// chap-sha1 scramble.
pub fn auth(sync: u32, username: &str, scramble: &[u8]) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::USERNAME), Value::from(username)),
        (
            Value::from(body_key::TUPLE),
            Value::Array(vec![
                Value::from(AUTH_MECHANISM),
                Value::Binary(scramble.to_vec()),
            ]),
        ),
    ]);
    encode(RequestCode::Auth, sync, Some(body))
}

fn store(code: RequestCode, sync: u32, space_id: u32, tuple: Value) -> Result<Bytes, WireError> {
    let body = Value::Map(vec![
        (Value::from(body_key::SPACE_ID), Value::from(space_id)),
        (Value::from(body_key::TUPLE), tuple),
    ]);
    encode(code, sync, Some(body))
}

fn encode(code: RequestCode, sync: u32, body: Option<Value>) -> Result<Bytes, WireError> {
    let header = Value::Map(vec![
        (Value::from(header_key::CODE), Value::from(code as u8)),
        (Value::from(header_key::SYNC), Value::from(sync)),
    ]);

    let mut payload = Vec::with_capacity(64);
    rmpv::encode::write_value(&mut payload, &header)?;
    if let Some(body) = body {
        rmpv::encode::write_value(&mut payload, &body)?;
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decode a request frame (without the length prefix) into its code,
/// sync, and optional body map. Used by the server side of tests and
/// tooling; the driver itself only encodes requests.
pub fn decode_request(frame: &[u8]) -> Result<(RequestCode, u32, Option<Value>), WireError> {
    let mut cursor = std::io::Cursor::new(frame);
    let header = rmpv::decode::read_value(&mut cursor)?;
    let entries = match header {
        Value::Map(entries) => entries,
        _ => return Err(WireError::Malformed),
    };

    let mut code = None;
    let mut sync = None;
    for (k, v) in &entries {
        match k.as_u64() {
            Some(header_key::CODE) => code = v.as_u64(),
            Some(header_key::SYNC) => sync = v.as_u64(),
            _ => {}
        }
    }
    let code = RequestCode::try_from(code.ok_or(WireError::Malformed)? as u8)?;
    let sync = sync.ok_or(WireError::Malformed)? as u32;

    let body = if (cursor.position() as usize) < frame.len() {
        Some(rmpv::decode::read_value(&mut cursor)?)
    } else {
        None
    };
    Ok((code, sync, body))
}
