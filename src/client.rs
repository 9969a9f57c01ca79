use std::fmt;
use std::future::Future;
use std::time::Duration;

use redis::aio::MultiplexedConnection;

use crate::{ConnectOptions, EstablishError, ProbeError, Result};

/// Liveness check the retry loop drives.
///
/// Implementations perform one round trip per call and report whether the
/// remote side answered. Callers may drop the returned future at any await
/// point, for example on cancellation.
pub trait Probe {
    /// Performs one liveness round trip.
    fn probe(&mut self) -> impl Future<Output = std::result::Result<(), ProbeError>> + Send;
}

/// Redis client handle whose connection has been verified with `PING`.
///
/// Constructing a handle performs no network I/O; the first probe dials the
/// server. A failed probe drops the connection so the next probe redials.
pub struct RedisHandle {
    client: redis::Client,
    options: ConnectOptions,
    connection: Option<MultiplexedConnection>,
}

impl fmt::Debug for RedisHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisHandle")
            .field("options", &self.options)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl RedisHandle {
    /// Creates an unconnected handle.
    pub fn new(options: ConnectOptions) -> Result<Self> {
        let client = redis::Client::open(options.connection_info()).map_err(|err| {
            EstablishError::Configuration(format!("invalid connection options: {err}"))
        })?;
        Ok(Self {
            client,
            options,
            connection: None,
        })
    }

    /// Options the handle was built from.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Underlying Redis client, usable to open further connections.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Connection verified by the last successful probe.
    pub fn connection(&self) -> Option<&MultiplexedConnection> {
        self.connection.as_ref()
    }

    /// Splits the handle into its client and verified connection.
    pub fn into_parts(self) -> (redis::Client, Option<MultiplexedConnection>) {
        (self.client, self.connection)
    }
}

impl Probe for RedisHandle {
    fn probe(&mut self) -> impl Future<Output = std::result::Result<(), ProbeError>> + Send {
        async move {
            let mut connection = match self.connection.take() {
                Some(connection) => connection,
                None => dial(&self.client, self.options.connect_timeout_ms).await?,
            };

            let ping = redis::cmd("PING");
            let reply: String =
                bounded("ping", self.options.probe_timeout_ms, ping.query_async(&mut connection))
                    .await??;
            if reply != "PONG" {
                return Err(ProbeError::UnexpectedReply(reply));
            }

            self.connection = Some(connection);
            Ok(())
        }
    }
}

async fn dial(
    client: &redis::Client,
    timeout_ms: u64,
) -> std::result::Result<MultiplexedConnection, ProbeError> {
    let connect = client.get_multiplexed_async_connection();
    let connection = bounded("connect", timeout_ms, connect).await??;
    Ok(connection)
}

/// Runs `future` under a deadline of `timeout_ms`; zero means no deadline.
async fn bounded<F: Future>(
    stage: &'static str,
    timeout_ms: u64,
    future: F,
) -> std::result::Result<F::Output, ProbeError> {
    if timeout_ms == 0 {
        return Ok(future.await);
    }
    tokio::time::timeout(Duration::from_millis(timeout_ms), future)
        .await
        .map_err(|_| ProbeError::Timeout { stage, timeout_ms })
}
