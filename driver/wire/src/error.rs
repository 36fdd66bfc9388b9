//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Frame length prefix exceeds the configured limit
    #[error("frame size limit exceeded: {0}")]
    Size(usize),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,

    /// Greeting shorter than the fixed banner size or non-UTF-8 salt
    #[error("malformed greeting")]
    Greeting,

    /// Salt is not valid base64
    #[error("invalid salt")]
    Salt,

    /// Unknown request code
    #[error("unknown request code {0}")]
    Request(u8),

    /// Msgpack encoding failure
    #[error("msgpack encode: {0}")]
    Encode(#[from] rmpv::encode::Error),

    /// Msgpack decoding failure
    #[error("msgpack decode: {0}")]
    Decode(#[from] rmpv::decode::Error),
}
