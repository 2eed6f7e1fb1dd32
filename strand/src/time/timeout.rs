use crate::context::Continuation;
use crate::deferred::{Deferred, Offer};
use crate::error::Error;
use crate::host::Host;

use std::time::Duration;

/// Bounds the time `deferred` may take to settle.
///
/// Returns a deferred settled with the outcome of `deferred`, or rejected
/// with [`Error::TimedOut`] if `duration` elapses first, in which case
/// `deferred` is cancelled. A deferred that is already settled is returned
/// as is. Cancelling the returned deferred cancels `deferred`.
///
/// ```rust,ignore
/// let reply = time::timeout(&host, Duration::from_secs(5), request(&peer));
/// match reply.await {
///     Err(Error::TimedOut(_)) => retry_later(),
///     other => handle(other?),
/// }
/// ```
pub fn timeout<H, T>(host: &H, duration: Duration, deferred: Deferred<T>) -> Deferred<T>
where
    H: Host + ?Sized,
    T: Clone + Send + 'static,
{
    if deferred.is_settled() {
        return deferred;
    }

    let result = deferred.then(|result| result);

    let source = deferred.downgrade();
    let target = result.downgrade();
    let expire = Continuation::new(move || {
        let Some(target) = target.upgrade() else {
            return;
        };
        if target.offer(Err(Error::TimedOut(duration))) == Offer::Accepted {
            tracing::debug!(?duration, "deferred timed out");
            if let Some(source) = source.upgrade() {
                source.cancel();
            }
        }
    });

    match host.schedule_after(duration, expire) {
        Ok(timer) => result.on_settled(move |_| timer.cancel()),
        Err(error) => {
            let _ = result.offer(Err(error));
            deferred.cancel();
        }
    }

    result
}
