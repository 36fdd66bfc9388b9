//! Endpoint addressing.
//!
//! An endpoint is a host/port pair with optional per-endpoint
//! credentials. The string forms `"host:port"`,
//! `"user:pass@host:port"`, and a bare port (host defaulting to
//! localhost) are all accepted, both for the primary address and for
//! entries of the reserve list.

use std::fmt;
use std::str::FromStr;

use crate::error::DriverError;

/// Default host when only a port is given
pub const DEFAULT_HOST: &str = "localhost";

/// One candidate address for the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Credentials overriding the connection-level username
    pub username: Option<String>,
    /// Credentials overriding the connection-level password
    pub password: Option<String>,
}

impl Endpoint {
    /// Endpoint without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (credentials, address) = match s.rsplit_once('@') {
            Some((cred, addr)) => (Some(cred), addr),
            None => (None, s),
        };

        let (username, password) = match credentials {
            Some(cred) => {
                let (user, pass) = cred.split_once(':').ok_or_else(|| {
                    DriverError::InvalidArgument(format!("malformed credentials in '{s}'"))
                })?;
                (Some(user.to_string()), Some(pass.to_string()))
            }
            None => (None, None),
        };

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port),
            // A bare port defaults the host to localhost.
            None => (DEFAULT_HOST.to_string(), address),
        };
        let port = port
            .parse::<u16>()
            .map_err(|_| DriverError::InvalidArgument(format!("invalid port in '{s}'")))?;
        if host.is_empty() {
            return Err(DriverError::InvalidArgument(format!(
                "missing host in '{s}'"
            )));
        }

        Ok(Endpoint {
            host,
            port,
            username,
            password,
        })
    }
}
