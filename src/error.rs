/// Error type returned by the establishment entry points.
#[derive(Debug, thiserror::Error)]
pub enum EstablishError {
    /// The connection target could not be turned into connection options.
    #[error("invalid connection target: {0}")]
    Configuration(String),
    /// Every permitted liveness probe failed.
    #[error("could not connect to Redis after {attempts} tries")]
    Exhausted {
        /// Number of probe attempts made.
        attempts: u32,
    },
    /// The cancellation token fired during a probe or a backoff sleep.
    #[error("connection attempt cancelled after {attempts} tries")]
    Cancelled {
        /// Number of probe attempts started before cancellation.
        attempts: u32,
    },
}

/// Failure of a single liveness probe.
///
/// Probe errors are logged by the retry loop and never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Error reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The connect or PING round trip did not finish in time.
    #[error("{stage} timed out after {timeout_ms} ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },
    /// The server answered PING with something other than PONG.
    #[error("unexpected PING reply: {0}")]
    UnexpectedReply(String),
    /// Any other probe failure.
    #[error("{0}")]
    Other(String),
}
