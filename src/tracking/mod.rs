//! Runtime side of leak tracking.
//!
//! Instrumented lifecycle methods feed a [`Registry`] of live objects, each stored with the
//! [`CallPath`] that created it. A [`LeakMonitor`] periodically turns the registry into a
//! [`Report`] and hands it to a [`ReportSink`].
//!
//! # Key Components
//!
//! - [`Registry`] - Concurrent token to creation context map
//! - [`CallPath`] - Captured or parsed call stack
//! - [`TokenAllocator`] - Monotonic identity tokens for trackers that assign their own
//! - [`LeakMonitor`] - Cancellable periodic reporter
//! - [`ConsoleSink`] / [`LogSink`] - Report destinations
//!
//! Teardown is explicit: stop the monitor first, then [`Registry::drain`] yields the final
//! leak report.

mod callpath;
mod monitor;
mod registry;
mod report;
mod token;

pub use callpath::CallPath;
pub use monitor::{LeakMonitor, MonitorConfig, DEFAULT_SHUTDOWN_TIMEOUT, MIN_INTERVAL};
pub use registry::{Registry, TrackedObject};
pub use report::{ConsoleSink, LogSink, Report, ReportSink};
pub use token::{IdentityToken, TokenAllocator};
