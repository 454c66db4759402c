use std::{future::Future, ops::ControlFlow, time::Duration};

use rand::{prelude::*, rngs::StdRng};
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

/// Exponential backoff with jitter
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub init_backoff: Duration,
    pub max_backoff: Duration,
    pub base: f64,
    /// Give up once the next attempt would start after this much time.
    pub deadline: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 3.,
            deadline: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackoffError {
    #[error("Retry exceeded deadline of {deadline:?}. Source: {source}")]
    DeadlineExceeded {
        deadline: Duration,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// [`Backoff`] can be created from a [`BackoffConfig`]
///
/// Consecutive calls to [`Backoff::next`] will return the next backoff interval
///
#[derive(Debug)]
pub struct Backoff<R = StdRng> {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    deadline: Option<Duration>,
    rng: R,
}

impl Backoff<StdRng> {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`]
    pub fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, StdRng::from_rng(&mut rand::rng()))
    }
}

impl<R: Rng> Backoff<R> {
    pub fn new_with_rng(config: &BackoffConfig, rng: R) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            deadline: config.deadline,
            rng,
        }
    }

    /// Returns the next backoff duration to wait for
    pub fn next(&mut self) -> Duration {
        let high = self.next_backoff_secs * self.base;
        let sampled = if high > self.init_backoff {
            self.rng.random_range(self.init_backoff..high)
        } else {
            self.init_backoff
        };
        let next_backoff = self.max_backoff_secs.min(sampled);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Perform an async operation that retries with a backoff
    ///
    /// `do_stuff` breaks with the final value or continues with the error that caused the attempt to fail.
    pub async fn retry_with_backoff<F, F1, B, E>(
        &mut self,
        request_name: &str,
        do_stuff: F,
    ) -> Result<B, BackoffError>
    where
        F: Fn() -> F1,
        F1: Future<Output = ControlFlow<B, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let start = Instant::now();

        loop {
            let e = match do_stuff().await {
                ControlFlow::Break(r) => return Ok(r),
                ControlFlow::Continue(e) => e,
            };

            let backoff = self.next();

            if let Some(deadline) = self.deadline {
                if start.elapsed() + backoff > deadline {
                    return Err(BackoffError::DeadlineExceeded {
                        deadline,
                        source: Box::new(e),
                    });
                }
            }

            info!(
                e=%e,
                request_name,
                backoff_ms = backoff.as_millis() as u64,
                "request encountered non-fatal error - backing off",
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use rand::RngCore;

    use super::*;
    use crate::error::Error;

    /// Rng that always yields the same word.
    #[derive(Debug)]
    struct ConstRng(u64);

    impl RngCore for ConstRng {
        fn next_u32(&mut self) -> u32 {
            (self.0 >> 32) as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.0
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            for chunk in dst.chunks_mut(8) {
                chunk.copy_from_slice(&self.0.to_le_bytes()[..chunk.len()]);
            }
        }
    }

    fn config() -> BackoffConfig {
        BackoffConfig {
            init_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(500),
            base: 3.,
            deadline: None,
        }
    }

    #[test]
    fn test_backoff() {
        let init_backoff_secs = 1.;
        let max_backoff_secs = 500.;
        let base: f64 = 3.;

        let assert_fuzzy_eq = |a: f64, b: f64| assert!((b - a).abs() < 0.0001, "{} != {}", a, b);

        // Create a static rng that takes the minimum of the range
        let mut backoff = Backoff::new_with_rng(&config(), ConstRng(0));

        for _ in 0..20 {
            assert_eq!(backoff.next().as_secs_f64(), init_backoff_secs);
        }

        // Create a static rng that takes the maximum of the range
        let mut backoff = Backoff::new_with_rng(&config(), ConstRng(u64::MAX));

        for i in 0..20 {
            let value = (base.powi(i) * init_backoff_secs).min(max_backoff_secs);
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
        }

        // Create a static rng that takes the mid point of the range
        let mut backoff = Backoff::new_with_rng(&config(), ConstRng(u64::MAX / 2));

        let mut value = init_backoff_secs;
        for _ in 0..20 {
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
            value =
                (init_backoff_secs + (value * base - init_backoff_secs) / 2.).min(max_backoff_secs);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let attempts = &AtomicUsize::new(0);
        let mut backoff = Backoff::new_with_rng(&config(), ConstRng(0));

        let res = backoff
            .retry_with_backoff("flaky", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    ControlFlow::Continue(Error::validation("not yet"))
                } else {
                    ControlFlow::Break("done")
                }
            })
            .await;

        assert_eq!(res.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let config = BackoffConfig {
            deadline: Some(Duration::from_secs(3)),
            ..config()
        };
        let mut backoff = Backoff::new_with_rng(&config, ConstRng(0));

        let res: Result<(), _> = backoff
            .retry_with_backoff("hopeless", || async {
                ControlFlow::Continue(Error::validation("never"))
            })
            .await;

        assert_matches!(res, Err(BackoffError::DeadlineExceeded { deadline, .. }) => {
            assert_eq!(deadline, Duration::from_secs(3));
        });
    }
}
