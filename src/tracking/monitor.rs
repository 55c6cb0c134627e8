//! Periodic leak reporting.
//!
//! A [`LeakMonitor`] owns two background threads. The ticker waits for the configured interval
//! on a condition variable, takes a [`Registry::snapshot`] and hands it over a bounded channel
//! to the reporter, which writes it to a [`ReportSink`]. A slow sink therefore never delays the
//! next tick: while a report is still being written, newer ones are dropped with a warning.
//!
//! The monitor only reads the registry. [`LeakMonitor::stop`] wakes the ticker immediately and
//! returns a final snapshot; dropping the monitor stops it as well. Reports still queued at that
//! point are discarded. A reporter stuck inside its sink is waited for at most
//! [`MonitorConfig::shutdown_timeout`] and then left to finish on its own.
//!
//! # Examples
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//! use leakscope::{
//!     tracking::{LogSink, MonitorConfig},
//!     CallPath, LeakMonitor, Registry,
//! };
//!
//! let registry = Arc::new(Registry::new());
//! let config = MonitorConfig::default().with_interval(Duration::from_millis(10));
//! let monitor = LeakMonitor::spawn(Arc::clone(&registry), config, LogSink)?;
//!
//! registry.add(1, CallPath::default());
//! let last = monitor.stop();
//! assert_eq!(last.count, 1);
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, warn};

use crate::{
    config::AgentConfig,
    tracking::{registry::Registry, report::Report, report::ReportSink},
    Result,
};

/// Shortest accepted reporting interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How long [`LeakMonitor::stop`] waits for a report that is being written.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings of a [`LeakMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between two reports, never below [`MIN_INTERVAL`]
    pub interval: Duration,
    /// Name of the ticker thread; the reporter thread appends `-report`
    pub thread_name: String,
    /// Upper bound on how long shutdown waits for the reporter thread
    pub shutdown_timeout: Duration,
}

impl MonitorConfig {
    /// Sets the reporting interval.
    ///
    /// Intervals shorter than [`MIN_INTERVAL`] are raised to it. Intervals too long to be
    /// represented as a deadline simply never elapse.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Sets how long shutdown waits for a report that is still being written.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: crate::config::DEFAULT_INTERVAL,
            thread_name: "leakscope-monitor".to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl From<&AgentConfig> for MonitorConfig {
    fn from(config: &AgentConfig) -> Self {
        MonitorConfig::default().with_interval(config.interval)
    }
}

/// Stop flag shared with the ticker.
#[derive(Debug, Default)]
struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn request_stop(&self) {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps until `interval` has elapsed. Returns `false` if a stop was requested first.
    ///
    /// An interval that overflows [`Instant`] has no deadline and only ends on a stop request.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now().checked_add(interval);
        let mut stopped = self.stop.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if *stopped {
                return false;
            }
            // Spurious wake-ups land back here with the remaining time.
            stopped = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    self.wake
                        .wait_timeout(stopped, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .wake
                    .wait(stopped)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// Background task that reports outstanding objects on a fixed interval.
pub struct LeakMonitor {
    registry: Arc<Registry>,
    shared: Arc<Shared>,
    ticker: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
    // Disconnects when the reporter thread exits
    reporter_done: Receiver<()>,
    shutdown_timeout: Duration,
}

impl LeakMonitor {
    /// Starts monitoring `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if a thread could not be spawned.
    pub fn spawn<S>(registry: Arc<Registry>, config: MonitorConfig, sink: S) -> Result<Self>
    where
        S: ReportSink + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = bounded::<Report>(1);
        let (done_tx, reporter_done) = bounded::<()>(0);

        let reporter = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{}-report", config.thread_name))
                .spawn(move || {
                    let _done = done_tx;
                    report_loop(&rx, &shared, &sink);
                })?
        };

        let ticker = {
            let registry = Arc::clone(&registry);
            let shared = Arc::clone(&shared);
            let interval = config.interval;
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || tick_loop(&registry, &shared, interval, &tx))
        };

        let ticker = match ticker {
            Ok(handle) => handle,
            Err(error) => {
                // The sender was moved into the failed closure and is gone, so the reporter
                // sees a disconnected channel and exits.
                let _ = reporter.join();
                return Err(error.into());
            }
        };

        debug!(
            "Leak monitor '{}' started, interval {:?}",
            config.thread_name, config.interval
        );
        Ok(LeakMonitor {
            registry,
            shared,
            ticker: Some(ticker),
            reporter: Some(reporter),
            reporter_done,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Returns `true` while the monitor threads are alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.is_stopped()
            && self
                .ticker
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the monitor, waits for its threads and returns the outstanding objects.
    ///
    /// A reporter still writing a report is waited for at most
    /// [`MonitorConfig::shutdown_timeout`]. The registry is left untouched; use [`Registry::drain`] to clear it.
    #[must_use]
    pub fn stop(mut self) -> Report {
        self.shutdown();
        self.registry.snapshot()
    }

    fn shutdown(&mut self) {
        self.shared.request_stop();

        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("Leak monitor thread panicked");
            }
        }

        // The ticker owned the only report sender, so an idle reporter is already on its way out.
        // One blocked in its sink is detached once the timeout passes.
        if let Some(reporter) = self.reporter.take() {
            match self.reporter_done.recv_timeout(self.shutdown_timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Leak report sink did not return within {:?}, detaching the reporter",
                        self.shutdown_timeout
                    );
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if reporter.join().is_err() {
                        warn!("Leak report thread panicked");
                    }
                }
            }
        }
    }
}

impl Drop for LeakMonitor {
    fn drop(&mut self) {
        if self.ticker.is_some() || self.reporter.is_some() {
            self.shutdown();
        }
    }
}

fn tick_loop(registry: &Registry, shared: &Shared, interval: Duration, tx: &Sender<Report>) {
    while shared.wait(interval) {
        match tx.try_send(registry.snapshot()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Previous leak report is still being written, dropping this one");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn report_loop<S: ReportSink>(rx: &Receiver<Report>, shared: &Shared, sink: &S) {
    for report in rx {
        if shared.is_stopped() {
            debug!("Leak monitor stopped, discarding queued report");
            break;
        }
        if let Err(error) = sink.emit(&report) {
            warn!("Failed to write leak report: {error}");
        }
    }
}
