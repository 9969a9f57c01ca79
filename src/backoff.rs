use std::time::Duration;

use rand::Rng;

use crate::config::{max_delay, ConfigSource};

/// Width of the jitter band around the ceiling, in milliseconds.
const CEILING_JITTER_MS: i64 = 100;

/// Computes the delay following `prior` using the thread-local RNG.
///
/// See [`next_delay_with`].
pub fn next_delay<C: ConfigSource + ?Sized>(source: &C, prior: i64) -> i64 {
    next_delay_with(&mut rand::thread_rng(), source, prior)
}

/// Grows `prior` by a random fraction of up to one half.
///
/// Once the grown value reaches the configured ceiling it is replaced by a
/// value within ±50 ms of the ceiling, so delays near the cap stay spread
/// out. The result can be negative for ceilings below 50 ms; use
/// [`sleep_duration`] before sleeping.
pub fn next_delay_with<R, C>(rng: &mut R, source: &C, prior: i64) -> i64
where
    R: Rng,
    C: ConfigSource + ?Sized,
{
    let delay = prior.saturating_add(random_below(rng, prior / 2));
    let ceiling = max_delay(source);
    if delay >= ceiling {
        return ceiling
            .saturating_add(random_below(rng, CEILING_JITTER_MS))
            .saturating_sub(CEILING_JITTER_MS / 2);
    }
    delay
}

/// Uniform integer in `[0, bound)`, or 0 when the range is empty.
pub(crate) fn random_below<R: Rng>(rng: &mut R, bound: i64) -> i64 {
    if bound <= 0 {
        0
    } else {
        rng.gen_range(0..bound)
    }
}

/// Converts a millisecond delay into a sleep duration, clamping at zero.
pub fn sleep_duration(delay_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0))
}
