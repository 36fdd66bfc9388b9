//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::{Endpoint, DEFAULT_HOST};
use crate::error::DriverError;

/// Default port of the tuple store
pub const DEFAULT_PORT: u16 = 3301;

/// Default consecutive-failure threshold before rotating to a reserve
pub const DEFAULT_BEFORE_RESERVE: u32 = 2;

/// Maps a 1-based attempt count to a reconnect delay. `None` means
/// "stop retrying" and triggers orderly teardown, not an error.
pub type RetryStrategy = Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>;

/// Connection configuration
#[derive(Clone)]
pub struct Config {
    /// Primary host
    pub host: String,
    /// Primary port
    pub port: u16,
    /// Username for the authentication handshake
    pub username: Option<String>,
    /// Password for the authentication handshake; its presence enables
    /// the handshake
    pub password: Option<String>,
    /// Ordered reserve endpoints, each in `"[user:pass@]host:port"` or
    /// bare-port form
    pub reserve_hosts: Vec<String>,
    /// Consecutive failures against the current endpoint before the
    /// cursor rotates to the next reserve
    pub before_reserve: u32,
    /// Reconnect backoff; absent means a transport loss closes the
    /// connection immediately
    pub retry_strategy: Option<RetryStrategy>,
    /// Defer the initial connect until the first issued command or an
    /// explicit connect call
    pub lazy_connect: bool,
    /// Socket timeout applied while connecting
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            reserve_hosts: Vec::new(),
            before_reserve: DEFAULT_BEFORE_RESERVE,
            retry_strategy: None,
            lazy_connect: false,
            timeout: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("reserve_hosts", &self.reserve_hosts)
            .field("before_reserve", &self.before_reserve)
            .field("retry_strategy", &self.retry_strategy.is_some())
            .field("lazy_connect", &self.lazy_connect)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    /// Configuration from a single `"[user:pass@]host:port"` or
    /// bare-port address string.
    pub fn from_addr(addr: &str) -> Result<Self, DriverError> {
        let endpoint: Endpoint = addr.parse()?;
        Ok(Self {
            host: endpoint.host,
            port: endpoint.port,
            username: endpoint.username,
            password: endpoint.password,
            ..Self::default()
        })
    }

    /// Build the ordered candidate list: the primary endpoint followed
    /// by the parsed reserves. Fails on the first malformed reserve
    /// string.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, DriverError> {
        let mut endpoints = vec![Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }];
        for reserve in &self.reserve_hosts {
            endpoints.push(reserve.parse()?);
        }
        Ok(endpoints)
    }
}
