use crate::deferred::Deferred;
use crate::host::Host;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Something a retry loop waits on between attempts.
pub trait Sleeper: Send {
    /// Returns a deferred resolved when the next attempt may start.
    fn sleep(&mut self) -> Deferred<()>;
}

impl<F> Sleeper for F
where
    F: FnMut() -> Deferred<()> + Send,
{
    fn sleep(&mut self) -> Deferred<()> {
        self()
    }
}

/// Linearly growing delay between iterations of a recurring job.
///
/// Starts at `min`, grows by `increment` after every sleep and stays at
/// `max` once reached. [`reset`](Self::reset) goes back to `min`, usually
/// after an iteration that made progress.
///
/// ```rust,ignore
/// let mut sleeper = Backoff::new(secs(1), secs(30), secs(5))
///     .with_jitter(Duration::from_millis(250))
///     .sleeper(host.clone());
///
/// sleeper.sleep().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    increment: Duration,
    jitter: Duration,
    delay: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, increment: Duration) -> Self {
        Self {
            min,
            max,
            increment,
            jitter: Duration::ZERO,
            delay: min,
        }
    }

    /// Adds a uniformly random extra delay in `[0, jitter)` to every sleep.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The base delay of the next sleep.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = self.min;
    }

    /// Returns the delay to sleep now, then grows the base delay.
    pub fn next_delay(&mut self) -> Duration {
        let mut delay = self.delay;
        if !self.jitter.is_zero() {
            delay += rand::thread_rng().gen_range(Duration::ZERO..self.jitter);
        }

        self.delay = (self.delay + self.increment).min(self.max);
        delay
    }

    /// Binds the policy to the host that runs its timers.
    pub fn sleeper(self, host: Arc<dyn Host>) -> BackoffSleeper {
        BackoffSleeper {
            host,
            backoff: self,
        }
    }
}

impl Default for Backoff {
    /// One minute, growing by a minute per sleep, capped at ten minutes.
    fn default() -> Self {
        Self::new(
            Duration::from_secs(60),
            Duration::from_secs(600),
            Duration::from_secs(60),
        )
    }
}

/// A [`Backoff`] sleeping on a [`Host`].
pub struct BackoffSleeper {
    host: Arc<dyn Host>,
    backoff: Backoff,
}

impl BackoffSleeper {
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn reset(&mut self) {
        self.backoff.reset();
    }
}

impl Sleeper for BackoffSleeper {
    fn sleep(&mut self) -> Deferred<()> {
        let delay = self.backoff.next_delay();
        tracing::debug!(?delay, "backing off");
        super::sleep(&*self.host, delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn grows_linearly_up_to_max() {
        let mut backoff = Backoff::new(secs(1), secs(3), secs(1));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![secs(1), secs(2), secs(3), secs(3), secs(3)]);

        backoff.reset();
        assert_eq!(backoff.delay(), secs(1));
    }

    #[test]
    fn default_matches_minute_steps() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), secs(60));
        assert_eq!(backoff.next_delay(), secs(120));
        assert_eq!(backoff.delay(), secs(180));
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut backoff = Backoff::new(secs(10), secs(10), secs(0)).with_jitter(secs(2));
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= secs(10) && delay < secs(12), "{delay:?}");
        }
    }
}
