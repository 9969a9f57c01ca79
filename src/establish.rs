use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::{next_delay, sleep_duration},
    client::Probe,
    config::{initial_delay, ConfigSource, EnvConfig},
    ConnectOptions, EstablishError, RedisHandle, Result,
};

/// Connects using the process environment for backoff tuning.
///
/// See [`Establisher::from_url`].
pub async fn from_url(cancel: &CancellationToken, max_tries: u32, url: &str) -> Result<RedisHandle> {
    Establisher::new().from_url(cancel, max_tries, url).await
}

/// Connects using the process environment for backoff tuning.
///
/// See [`Establisher::from_address`].
pub async fn from_address(
    cancel: &CancellationToken,
    max_tries: u32,
    address: &str,
    password: &str,
) -> Result<RedisHandle> {
    Establisher::new()
        .from_address(cancel, max_tries, address, password)
        .await
}

/// Connects using the process environment for backoff tuning.
///
/// See [`Establisher::from_options`].
pub async fn from_options(
    cancel: &CancellationToken,
    max_tries: u32,
    options: ConnectOptions,
) -> Result<RedisHandle> {
    Establisher::new().from_options(cancel, max_tries, options).await
}

/// Steps of the retry loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Probing,
    Backoff,
    Succeeded,
    Exhausted,
    Cancelled,
}

/// Drives a bounded, jittered exponential-backoff retry loop around a
/// liveness probe.
///
/// Backoff tunables are read from `C` on every use; see
/// [`crate::config`] for the keys.
#[derive(Clone, Debug, Default)]
pub struct Establisher<C = EnvConfig> {
    config: C,
}

impl Establisher {
    /// Creates an establisher reading the process environment.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: ConfigSource> Establisher<C> {
    /// Creates an establisher reading backoff tunables from `config`.
    pub fn with_config(config: C) -> Self {
        Self { config }
    }

    /// Configuration source in use.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Parses `url` and connects with at most `max_tries` probes.
    ///
    /// A malformed URL fails immediately without probing.
    pub async fn from_url(
        &self,
        cancel: &CancellationToken,
        max_tries: u32,
        url: &str,
    ) -> Result<RedisHandle> {
        let options = ConnectOptions::from_url(url)?;
        self.from_options(cancel, max_tries, options).await
    }

    /// Connects to `address` (`host:port`) authenticating with `password`.
    pub async fn from_address(
        &self,
        cancel: &CancellationToken,
        max_tries: u32,
        address: &str,
        password: &str,
    ) -> Result<RedisHandle> {
        let options = ConnectOptions::from_address(address, password)?;
        self.from_options(cancel, max_tries, options).await
    }

    /// Builds the handle once and probes it until it answers.
    pub async fn from_options(
        &self,
        cancel: &CancellationToken,
        max_tries: u32,
        options: ConnectOptions,
    ) -> Result<RedisHandle> {
        #[cfg(feature = "tracing")]
        tracing::debug!(address = %options.address(), max_tries, "connecting to Redis");

        let handle = RedisHandle::new(options)?;
        self.establish(cancel, max_tries, handle).await
    }

    /// Probes `target` up to `max_tries` times and returns it once a probe
    /// succeeds.
    ///
    /// Every failed probe is logged and followed by a backoff sleep, the
    /// last one included. Cancellation is observed while probing and while
    /// sleeping. `max_tries == 0` fails without probing.
    pub async fn establish<P: Probe>(
        &self,
        cancel: &CancellationToken,
        max_tries: u32,
        mut target: P,
    ) -> Result<P> {
        let mut tries = 0u32;
        let mut delay = initial_delay(&self.config);
        let mut state = State::Probing;

        loop {
            state = match state {
                State::Probing if tries >= max_tries => State::Exhausted,
                State::Probing if cancel.is_cancelled() => State::Cancelled,
                State::Probing => {
                    tries += 1;
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = target.probe() => Some(result),
                    };
                    match outcome {
                        None => State::Cancelled,
                        Some(Ok(())) => State::Succeeded,
                        Some(Err(err)) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                attempt = tries,
                                max_tries,
                                error = %err,
                                "unable to connect to Redis"
                            );
                            #[cfg(not(feature = "tracing"))]
                            let _ = err;
                            State::Backoff
                        }
                    }
                }
                State::Backoff => {
                    delay = next_delay(&self.config, delay);

                    #[cfg(feature = "tracing")]
                    tracing::debug!("retrying Redis connection after {} ms", delay);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => State::Cancelled,
                        _ = sleep(sleep_duration(delay)) => State::Probing,
                    }
                }
                State::Succeeded => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt = tries, "connected to Redis");
                    return Ok(target);
                }
                State::Exhausted => return Err(EstablishError::Exhausted { attempts: tries }),
                State::Cancelled => return Err(EstablishError::Cancelled { attempts: tries }),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use std::time::Duration;

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::Establisher;
    use crate::{
        client::Probe,
        config::{initial_delay, INITIAL_DELAY_KEY, MAX_DELAY_KEY},
        EstablishError, ProbeError,
    };

    /// Fails its first `failures` probes, then succeeds.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl Flaky {
        fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Probe for Flaky {
        fn probe(&mut self) -> impl Future<Output = Result<(), ProbeError>> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = call <= self.failures;
            async move {
                if fail {
                    Err(ProbeError::Other(format!("refused on call {call}")))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Never answers.
    #[derive(Debug)]
    struct Hung;

    impl Probe for Hung {
        fn probe(&mut self) -> impl Future<Output = Result<(), ProbeError>> + Send {
            std::future::pending()
        }
    }

    fn establisher(initial: &str, max: &str) -> Establisher<HashMap<String, String>> {
        Establisher::with_config(HashMap::from([
            (INITIAL_DELAY_KEY.to_owned(), initial.to_owned()),
            (MAX_DELAY_KEY.to_owned(), max.to_owned()),
        ]))
    }

    #[tokio::test(start_paused = true)]
    async fn borrowed_config_is_read_on_each_call() {
        let cfg = HashMap::from([(INITIAL_DELAY_KEY.to_owned(), "1".to_owned())]);
        let establisher = Establisher::with_config(&cfg);
        assert_eq!(initial_delay(establisher.config()), 1);

        let (probe, calls) = Flaky::new(1);
        let started = Instant::now();
        establisher
            .establish(&CancellationToken::new(), 2, probe)
            .await
            .expect("second probe must succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_fails_without_probing() {
        let (probe, calls) = Flaky::new(0);
        let err = establisher("1", "100")
            .establish(&CancellationToken::new(), 0, probe)
            .await
            .expect_err("zero budget must fail");

        assert!(matches!(err, EstablishError::Exhausted { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_success_returns_without_sleeping() {
        let (probe, calls) = Flaky::new(0);
        let started = Instant::now();
        establisher("1000", "15000")
            .establish(&CancellationToken::new(), 2, probe)
            .await
            .expect("first probe must succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_last_permitted_attempt_is_success() {
        let (probe, calls) = Flaky::new(2);
        let result = establisher("1", "100")
            .establish(&CancellationToken::new(), 3, probe)
            .await;

        assert!(result.is_ok(), "final-attempt success misreported: {result:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_k_attempts_stops_probing() {
        let (probe, calls) = Flaky::new(1);
        establisher("1", "100")
            .establish(&CancellationToken::new(), 5, probe)
            .await
            .expect("second probe must succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_sleeps_after_each_failure() {
        let (probe, calls) = Flaky::new(u32::MAX);
        let started = Instant::now();
        // A 1 ms initial delay never grows, so each sleep lasts 1 ms.
        let err = establisher("1", "100")
            .establish(&CancellationToken::new(), 3, probe)
            .await
            .expect_err("always failing probe must exhaust");
        let elapsed = started.elapsed();

        assert!(matches!(err, EstablishError::Exhausted { attempts: 3 }));
        assert!(err.to_string().contains('3'));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(elapsed, Duration::from_millis(3));
    }

    #[tokio::test(start_paused = true)]
    async fn short_delays_scenario_stays_near_ceiling() {
        let (probe, calls) = Flaky::new(u32::MAX);
        let started = Instant::now();
        let err = establisher("25", "50")
            .establish(&CancellationToken::new(), 3, probe)
            .await
            .expect_err("always failing probe must exhaust");
        let elapsed = started.elapsed();

        assert!(err.to_string().contains("after 3 tries"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The first retry sleeps at least the initial delay, re-rolled
        // sleeps stay below ceiling + 50 ms.
        assert!(elapsed >= Duration::from_millis(25), "only slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3 * 100), "slept {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_stops_before_probing() {
        let (probe, calls) = Flaky::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = establisher("1", "100")
            .establish(&cancel, 3, probe)
            .await
            .expect_err("cancelled token must fail");

        assert!(matches!(err, EstablishError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let (probe, calls) = Flaky::new(u32::MAX);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = establisher("10000", "15000")
            .establish(&cancel, 5, probe)
            .await
            .expect_err("cancellation must abort the loop");

        assert!(matches!(err, EstablishError::Cancelled { attempts: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_hung_probe() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let err = establisher("1", "100")
            .establish(&cancel, 3, Hung)
            .await
            .expect_err("cancellation must abort the probe");

        assert!(matches!(err, EstablishError::Cancelled { attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_url_fails_without_probing() {
        let err = establisher("1", "100")
            .from_url(&CancellationToken::new(), 3, "not a url")
            .await
            .expect_err("malformed url must fail");

        assert!(matches!(err, EstablishError::Configuration(_)));
    }
}
