use super::Reactor;

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Builder for configuring and creating a [`Reactor`].
///
/// # Examples
///
/// ```rust,ignore
/// let reactor = ReactorBuilder::new()
///     .selector_threads(2)
///     .worker_threads(8)
///     .default_timeout(Duration::from_secs(15))
///     .build()?;
/// ```
pub struct ReactorBuilder {
    /// Number of selector loop threads.
    selector_threads: usize,

    /// Number of background worker threads.
    worker_threads: usize,

    /// Default timeout horizon handed to clients without a specific
    /// deadline, or `None` for no default.
    default_timeout: Option<Duration>,
}

impl ReactorBuilder {
    /// Creates a new `ReactorBuilder` with default configuration.
    ///
    /// One selector thread, one worker per available logical CPU
    /// (falling back to `1` if unavailable) and no default timeout.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            selector_threads: 1,
            worker_threads,
            default_timeout: None,
        }
    }

    /// Sets the number of selector threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn selector_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "selector_threads must be > 0");

        self.selector_threads = n;
        self
    }

    /// Sets the number of background worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Sets the default timeout horizon.
    ///
    /// # Panics
    ///
    /// Panics if the duration is zero.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "default timeout may not be zero");

        self.default_timeout = Some(timeout);
        self
    }

    /// Builds the reactor, starting its selector and worker threads.
    pub fn build(self) -> io::Result<Arc<Reactor>> {
        Reactor::new(
            self.selector_threads,
            self.worker_threads,
            self.default_timeout,
        )
    }
}

impl Default for ReactorBuilder {
    /// Creates a default `ReactorBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
