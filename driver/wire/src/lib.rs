//! Wire protocol framing, request encoding, response decoding, and the
//! authentication scramble for the tuple-store driver.
//!
//! This crate is the I/O-free half of the driver: it turns commands into
//! frame bytes, raw TCP bytes into whole frames, and whole frames into
//! response envelopes. The connection state machine lives in `tnt-client`.
//!
//! ## Features
//!
//! - **Frame Reassembly**: incremental buffer that turns arbitrary TCP
//!   chunks into whole length-prefixed frames
//! - **Request Encoders**: msgpack builders for select/insert/replace/
//!   update/delete/upsert/call/eval/ping/auth
//! - **Response Envelopes**: sync, status code, schema id, data/error
//! - **Auth Scramble**: chap-sha1 challenge response from the server salt
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len (BE)   | length of bytes that follow|
//! +----------------------+----------------------------+
//! | header map (msgpack) | request code, sync, schema |
//! +----------------------+----------------------------+
//! | body map (msgpack)   | command arguments / result |
//! +----------------------+----------------------------+
//! ```
//!
//! The server greets every new connection with a fixed 128-byte text
//! banner whose bytes 64..108 are the base64 salt consumed by
//! [`scramble`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod buffer;
pub mod constants;
pub mod error;
pub mod request;
pub mod response;

// Re-export main types
pub use auth::{parse_salt, scramble, GREETING_SIZE, SALT_LEN};
pub use buffer::{ReadBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use constants::{body_key, header_key, system, IteratorType, RequestCode, AUTH_MECHANISM};
pub use error::WireError;
pub use request::decode_request;
pub use response::{decode_response, encode_response, Response};
