//! Timers on top of a [`Host`](crate::host::Host).
//!
//! - [`sleep`] resolves a deferred after a delay.
//! - [`timeout`] bounds how long a deferred may stay pending.
//! - [`Backoff`] spaces out the attempts of a recurring or retried job.

mod backoff;
mod sleep;
mod timeout;

pub use backoff::{Backoff, BackoffSleeper, Sleeper};

#[doc(inline)]
pub use sleep::sleep;

#[doc(inline)]
pub use timeout::timeout;
