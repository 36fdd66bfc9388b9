//! Protocol constants: request codes, header/body map keys, iterator
//! types, and the system spaces used for symbolic name resolution.

use crate::WireError;

/// Authentication mechanism name carried in the auth request tuple
pub const AUTH_MECHANISM: &str = "chap-sha1";

/// Request codes as defined by the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    /// Select tuples from a space
    Select = 0x01,
    /// Insert a tuple
    Insert = 0x02,
    /// Replace a tuple
    Replace = 0x03,
    /// Update tuple fields
    Update = 0x04,
    /// Delete a tuple
    Delete = 0x05,
    /// Authenticate the connection
    Auth = 0x07,
    /// Evaluate a server-side expression
    Eval = 0x08,
    /// Update-or-insert a tuple
    Upsert = 0x09,
    /// Call a stored function
    Call = 0x0A,
    /// Liveness probe
    Ping = 0x40,
}

impl TryFrom<u8> for RequestCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RequestCode::Select),
            0x02 => Ok(RequestCode::Insert),
            0x03 => Ok(RequestCode::Replace),
            0x04 => Ok(RequestCode::Update),
            0x05 => Ok(RequestCode::Delete),
            0x07 => Ok(RequestCode::Auth),
            0x08 => Ok(RequestCode::Eval),
            0x09 => Ok(RequestCode::Upsert),
            0x0A => Ok(RequestCode::Call),
            0x40 => Ok(RequestCode::Ping),
            _ => Err(WireError::Request(value)),
        }
    }
}

/// Iterator types accepted by select
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    /// Key equality
    Eq = 0,
    /// Reverse key equality
    Req = 1,
    /// All tuples, key ignored
    All = 2,
    /// Strictly less than key
    Lt = 3,
    /// Less than or equal to key
    Le = 4,
    /// Greater than or equal to key
    Ge = 5,
    /// Strictly greater than key
    Gt = 6,
}

/// Header map keys
pub mod header_key {
    /// Request or response code
    pub const CODE: u64 = 0x00;
    /// Request id correlating a response to its request
    pub const SYNC: u64 = 0x01;
    /// Server-side schema version, responses only
    pub const SCHEMA_ID: u64 = 0x05;
}

/// Body map keys
pub mod body_key {
    /// Numeric space id
    pub const SPACE_ID: u64 = 0x10;
    /// Numeric index id
    pub const INDEX_ID: u64 = 0x11;
    /// Select result limit
    pub const LIMIT: u64 = 0x12;
    /// Select result offset
    pub const OFFSET: u64 = 0x13;
    /// Iterator code
    pub const ITERATOR: u64 = 0x14;
    /// Key tuple
    pub const KEY: u64 = 0x20;
    /// Tuple payload (also auth credentials tuple)
    pub const TUPLE: u64 = 0x21;
    /// Stored function name
    pub const FUNCTION_NAME: u64 = 0x22;
    /// Username for auth
    pub const USERNAME: u64 = 0x23;
    /// Expression for eval
    pub const EXPRESSION: u64 = 0x27;
    /// Operation list for upsert
    pub const OPS: u64 = 0x28;
    /// Result rows, responses only
    pub const DATA: u64 = 0x30;
    /// Error message, responses only
    pub const ERROR: u64 = 0x31;
}

/// System spaces and indexes consulted for symbolic name resolution
pub mod system {
    /// Space holding space metadata
    pub const SPACE_SPACE: u32 = 280;
    /// Space holding index metadata
    pub const SPACE_INDEX: u32 = 288;
    /// Index of the space-metadata space keyed by space name
    pub const INDEX_SPACE_NAME: u32 = 2;
    /// Index of the index-metadata space keyed by (space id, index name)
    pub const INDEX_INDEX_NAME: u32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_code_conversion() {
        assert_eq!(RequestCode::try_from(0x01).unwrap(), RequestCode::Select);
        assert_eq!(RequestCode::try_from(0x40).unwrap(), RequestCode::Ping);
        assert!(RequestCode::try_from(0xFF).is_err());
        assert!(RequestCode::try_from(0x06).is_err());
    }

    #[test]
    fn test_iterator_codes() {
        assert_eq!(IteratorType::Eq as u8, 0);
        assert_eq!(IteratorType::All as u8, 2);
        assert_eq!(IteratorType::Gt as u8, 6);
    }
}
