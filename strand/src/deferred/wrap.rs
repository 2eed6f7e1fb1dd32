use super::Deferred;
use crate::error::Error;

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Logs the rejection of a deferred nobody else handles.
    ///
    /// Meant for the end of a chain whose result is otherwise dropped, such
    /// as a background task started with [`task::spawn`](crate::task::spawn).
    ///
    /// # Arguments
    ///
    /// * `what` - Label naming the work in the log entry.
    /// * `ignore` - Returns `true` for errors that are expected and must not
    ///   be logged. [`Error::Cancelled`] is always ignored.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// task::spawn(refresh_cache())
    ///     .log_errors("cache refresh", |error| matches!(error, Error::TimedOut(_)));
    /// ```
    pub fn log_errors<F>(&self, what: &'static str, ignore: F)
    where
        F: Fn(&Error) -> bool + Send + 'static,
    {
        self.on_settled(move |result| {
            let Err(error) = result else {
                return;
            };
            if matches!(error, Error::Cancelled) || ignore(&error) {
                tracing::trace!(what, %error, "ignored error at the end of a chain");
                return;
            }
            tracing::error!(what, %error, fatal = error.is_fatal(), "unhandled error");
        });
    }
}
