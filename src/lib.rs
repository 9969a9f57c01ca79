//! `redis-factory` hands out Redis clients whose connection has already
//! answered a `PING`.
//!
//! Connection targets are accepted in three forms:
//! - [`from_url`] / [`Establisher::from_url`]
//! - [`from_address`] / [`Establisher::from_address`]
//! - [`from_options`] / [`Establisher::from_options`]
//!
//! Each call builds the client once, then probes it up to `max_tries` times,
//! sleeping with jittered exponential backoff between failures. Backoff
//! tunables come from a [`ConfigSource`], the process environment by
//! default (`REDIS_CONNECTION_INITIAL_DELAY`, `REDIS_CONNECTION_MAX_DELAY`).

pub mod backoff;
mod client;
pub mod config;
mod error;
mod establish;
mod options;

pub use client::{Probe, RedisHandle};
pub use config::{ConfigSource, EnvConfig};
pub use error::{EstablishError, ProbeError};
pub use establish::{from_address, from_options, from_url, Establisher};
pub use options::ConnectOptions;

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, EstablishError>;
