//! Leak reports and where they are written.

use std::{
    collections::BTreeSet,
    fmt,
    io::{self, Write},
};

use log::info;

use crate::Result;

/// Point-in-time summary of the outstanding objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Number of objects created but not yet disposed
    pub count: usize,
    /// Distinct creation contexts of those objects, sorted
    pub contexts: BTreeSet<String>,
}

impl Report {
    /// Creates a report.
    #[must_use]
    pub fn new(count: usize, contexts: BTreeSet<String>) -> Self {
        Report { count, contexts }
    }

    /// Returns `true` if no object is outstanding.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Active count: {}", self.count)?;
        if !self.contexts.is_empty() {
            write!(f, "\nUnreleased objects: ")?;
            for (position, context) in self.contexts.iter().enumerate() {
                if position > 0 {
                    writeln!(f)?;
                }
                write!(f, "{context}")?;
            }
        }
        Ok(())
    }
}

/// Destination for periodic reports.
pub trait ReportSink: Send {
    /// Writes one report.
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be written. The monitor logs it and keeps
    /// running.
    fn emit(&self, report: &Report) -> Result<()>;
}

impl<F> ReportSink for F
where
    F: Fn(&Report) -> Result<()> + Send,
{
    fn emit(&self, report: &Report) -> Result<()> {
        self(report)
    }
}

/// Writes reports to standard output, one line per entry.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    prefix: String,
}

impl ConsoleSink {
    /// Creates a sink that starts every line with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        ConsoleSink {
            prefix: prefix.into(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        ConsoleSink::new("[Agent] ")
    }
}

impl ReportSink for ConsoleSink {
    fn emit(&self, report: &Report) -> Result<()> {
        let mut out = io::stdout().lock();
        for line in report.to_string().lines() {
            writeln!(out, "{}{line}", self.prefix)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Emits reports through the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &Report) -> Result<()> {
        info!("{report}");
        Ok(())
    }
}
