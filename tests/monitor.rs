use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use leakscope::{
    tracking::{MonitorConfig, ReportSink},
    AgentConfig, CallPath, Error, LeakMonitor, Registry, Report, Result,
};

fn fast() -> MonitorConfig {
    MonitorConfig::default()
        .with_interval(Duration::from_millis(10))
        .with_thread_name("monitor-test")
}

struct ChannelSink(mpsc::Sender<Report>);

impl ReportSink for ChannelSink {
    fn emit(&self, report: &Report) -> Result<()> {
        let _ = self.0.send(report.clone());
        Ok(())
    }
}

#[test]
fn reports_follow_the_registry() {
    let registry = Arc::new(Registry::new());
    let (tx, rx) = mpsc::channel();
    let monitor = LeakMonitor::spawn(Arc::clone(&registry), fast(), ChannelSink(tx)).unwrap();

    registry.add(1, CallPath::new(vec!["A.make(A.java:1)".to_string()]));
    registry.add(2, CallPath::new(vec!["B.make(B.java:2)".to_string()]));

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = None;
    while Instant::now() < deadline {
        let report = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        if report.count == 2 {
            seen = Some(report);
            break;
        }
    }
    let report = seen.expect("a report with both objects");
    assert_eq!(
        report.to_string(),
        "Active count: 2\nUnreleased objects: A.make(A.java:1)\nB.make(B.java:2)"
    );

    registry.remove(1);
    let last = monitor.stop();
    assert_eq!(last.count, 1);

    // The monitor never mutates the registry
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.drain().count, 1);
}

#[test]
fn no_reports_after_stop() {
    let registry = Arc::new(Registry::new());
    let count = Arc::new(AtomicUsize::new(0));
    let sink = {
        let count = Arc::clone(&count);
        move |_: &Report| -> Result<()> {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };

    let monitor = LeakMonitor::spawn(registry, fast(), sink).unwrap();
    thread::sleep(Duration::from_millis(50));
    let _ = monitor.stop();

    let after_stop = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn slow_sink_does_not_stall_the_ticker() {
    let registry = Arc::new(Registry::new());
    let written = Arc::new(AtomicUsize::new(0));
    let sink = {
        let written = Arc::clone(&written);
        move |_: &Report| -> Result<()> {
            thread::sleep(Duration::from_millis(100));
            written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };

    let monitor = LeakMonitor::spawn(registry, fast(), sink).unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(monitor.is_running());

    let started = Instant::now();
    let _ = monitor.stop();
    // Only the report in flight is finished, the queued one is discarded
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(written.load(Ordering::SeqCst) <= 3);
}

#[test]
fn blocked_sink_does_not_hold_up_stop() {
    let registry = Arc::new(Registry::new());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let sink = move |_: &Report| -> Result<()> {
        let _ = entered_tx.send(());
        // Blocks until the test lets go of the sender
        let _ = release_rx.recv();
        Ok(())
    };

    let config = fast()
        .with_interval(Duration::from_millis(5))
        .with_shutdown_timeout(Duration::from_millis(100));
    let monitor = LeakMonitor::spawn(Arc::clone(&registry), config, sink).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    // Let the ticker queue another report behind the blocked one
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert!(monitor.stop().is_clean());
    assert!(started.elapsed() < Duration::from_secs(5));

    // Once unblocked, the detached reporter drops the queued report instead of writing it
    drop(release_tx);
    assert!(entered_rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn interval_beyond_instant_range_keeps_running() {
    let agent = AgentConfig::parse_options("interval=18446744073709551615").unwrap();
    let config = MonitorConfig::from(&agent).with_thread_name("monitor-forever");
    assert_eq!(config.interval, Duration::from_secs(u64::MAX));

    let monitor = LeakMonitor::spawn(Arc::new(Registry::new()), config, |_: &Report| -> Result<()> {
        Ok(())
    })
    .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(monitor.is_running());

    let started = Instant::now();
    assert!(monitor.stop().is_clean());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn failing_sink_keeps_running() {
    let registry = Arc::new(Registry::new());
    let attempts = Arc::new(AtomicUsize::new(0));
    let sink = {
        let attempts = Arc::clone(&attempts);
        move |_: &Report| -> Result<()> {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Error("sink unavailable".to_string()))
        }
    };

    let monitor = LeakMonitor::spawn(registry, fast(), sink).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while attempts.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert!(monitor.is_running());
}

#[test]
fn drop_stops_the_monitor() {
    let registry = Arc::new(Registry::new());
    let config = MonitorConfig::from(&AgentConfig::default());
    assert_eq!(config.interval, Duration::from_secs(5));

    let started = Instant::now();
    {
        let _monitor = LeakMonitor::spawn(Arc::clone(&registry), config, |_: &Report| -> Result<()> {
            Ok(())
        })
        .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(Arc::strong_count(&registry), 1);
}
