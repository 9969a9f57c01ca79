use std::collections::HashMap;

/// Key holding the first backoff delay, in milliseconds.
pub const INITIAL_DELAY_KEY: &str = "REDIS_CONNECTION_INITIAL_DELAY";
/// Key holding the backoff ceiling, in milliseconds.
pub const MAX_DELAY_KEY: &str = "REDIS_CONNECTION_MAX_DELAY";

/// Fallback for [`INITIAL_DELAY_KEY`].
pub const DEFAULT_INITIAL_DELAY_MS: i64 = 1_000;
/// Fallback for [`MAX_DELAY_KEY`].
pub const DEFAULT_MAX_DELAY_MS: i64 = 15_000;

/// Key-value lookup the backoff tunables are read from.
///
/// Values are looked up on every use, so changes to the source take effect
/// on the next delay computation.
pub trait ConfigSource {
    /// Returns the raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads configuration from the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for &T {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Parses `key` as a base-10 integer, falling back to `default` when the
/// key is unset, empty or not an integer.
pub fn int_or_default<C: ConfigSource + ?Sized>(source: &C, key: &str, default: i64) -> i64 {
    match source.get(key) {
        Some(value) if !value.is_empty() => value.parse().unwrap_or(default),
        _ => default,
    }
}

/// Delay before the first retry, in milliseconds.
pub fn initial_delay<C: ConfigSource + ?Sized>(source: &C) -> i64 {
    int_or_default(source, INITIAL_DELAY_KEY, DEFAULT_INITIAL_DELAY_MS)
}

/// Ceiling the backoff re-rolls around, in milliseconds.
pub fn max_delay<C: ConfigSource + ?Sized>(source: &C) -> i64 {
    int_or_default(source, MAX_DELAY_KEY, DEFAULT_MAX_DELAY_MS)
}
