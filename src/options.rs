use std::fmt;

use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

use crate::{EstablishError, Result};

/// Host used when an address string is empty.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when an address string has none.
pub const DEFAULT_PORT: u16 = 6379;

/// Normalized connection parameters for a single Redis server.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Server host name or IP address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// ACL user name, if any.
    pub username: Option<String>,
    /// Password sent with `AUTH`, if any.
    pub password: Option<String>,
    /// Logical database selected after connecting.
    pub db: i64,
    /// Upper bound for opening the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound for the PING round trip, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            connect_timeout_ms: 5_000,
            probe_timeout_ms: 3_000,
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .finish()
    }
}

impl ConnectOptions {
    /// Parses a `redis://[user][:password@]host[:port][/db]` URL.
    ///
    /// TLS (`rediss://`) and unix socket targets are rejected.
    pub fn from_url(url: &str) -> Result<Self> {
        let info = url
            .trim()
            .into_connection_info()
            .map_err(|err| EstablishError::Configuration(format!("invalid Redis URL: {err}")))?;

        let (host, port) = match info.addr {
            ConnectionAddr::Tcp(host, port) => (host, port),
            ConnectionAddr::TcpTls { .. } => {
                return Err(EstablishError::Configuration(
                    "TLS connections are not supported".to_owned(),
                ))
            }
            _ => {
                return Err(EstablishError::Configuration(
                    "only TCP connections are supported".to_owned(),
                ))
            }
        };

        Ok(Self {
            host,
            port,
            username: info.redis.username,
            password: info.redis.password,
            db: info.redis.db,
            ..Self::default()
        })
    }

    /// Builds options from a `host:port` address and a password.
    ///
    /// An empty address means `localhost:6379`, an empty password means none.
    pub fn from_address(address: &str, password: &str) -> Result<Self> {
        let (host, port) = split_address(address)?;
        Ok(Self {
            host,
            port,
            password: non_empty(password),
            ..Self::default()
        })
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Sets the PING timeout.
    pub fn with_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    /// `host:port` form of the target, for logs.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub(crate) fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: self.username.clone(),
                password: self.password.clone(),
                ..RedisConnectionInfo::default()
            },
        }
    }
}

fn split_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Ok((DEFAULT_HOST.to_owned(), DEFAULT_PORT));
    }

    // Bracketed IPv6, e.g. `[::1]:6379`.
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            EstablishError::Configuration(format!("unterminated IPv6 address '{address}'"))
        })?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, address)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => {
                return Err(EstablishError::Configuration(format!(
                    "invalid address '{address}'"
                )))
            }
        };
        return Ok((host.to_owned(), port));
    }

    match address.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Ok((address.to_owned(), DEFAULT_PORT)),
        Some((host, port)) => {
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            Ok((host.to_owned(), parse_port(port, address)?))
        }
        None => Ok((address.to_owned(), DEFAULT_PORT)),
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| EstablishError::Configuration(format!("invalid port in address '{address}'")))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}
