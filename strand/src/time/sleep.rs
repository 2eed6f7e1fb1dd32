use crate::context::Continuation;
use crate::deferred::Deferred;
use crate::host::Host;

use std::time::Duration;

/// Returns a deferred resolved once `duration` has elapsed on `host`.
///
/// Cancelling the deferred cancels the timer and rejects it with
/// [`Error::Cancelled`](crate::Error::Cancelled). If the host is shut
/// down the deferred is rejected right away.
///
/// # Examples
///
/// ```rust,ignore
/// time::sleep(&host, Duration::from_millis(100)).await?;
/// ```
pub fn sleep<H: Host + ?Sized>(host: &H, duration: Duration) -> Deferred<()> {
    let deferred = Deferred::new();
    deferred.set_describer(move || format!("sleep({duration:?})"));

    let target = deferred.clone();
    let wake = Continuation::new(move || {
        let _ = target.offer(Ok(()));
    });

    match host.schedule_after(duration, wake) {
        Ok(timer) => deferred.set_canceller(move |_| timer.cancel()),
        Err(error) => {
            let _ = deferred.offer(Err(error));
        }
    }

    deferred
}
