//! Captured call paths.
//!
//! A [`CallPath`] is the creation context stored with every tracked object: an ordered list of
//! frame descriptions, innermost first. Instrumented JVM code passes its stack as the text of
//! `Arrays.toString(Thread.currentThread().getStackTrace())`, which
//! [`CallPath::from_java_trace`] splits back into frames. Native callers use
//! [`CallPath::capture`], which walks the current thread's stack with the `backtrace` crate.

use std::fmt;

/// The frame that performs the capture on the JVM side.
const GET_STACK_TRACE: &str = "java.lang.Thread.getStackTrace";

/// An ordered call path, innermost frame first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallPath {
    frames: Vec<String>,
}

impl CallPath {
    /// Creates a call path from frame descriptions, innermost first.
    #[must_use]
    pub fn new(frames: Vec<String>) -> Self {
        CallPath { frames }
    }

    /// Captures the call path of the current thread.
    ///
    /// Symbols are resolved eagerly, so this is expensive; frames without a symbol are rendered
    /// by instruction pointer.
    #[must_use]
    pub fn capture() -> Self {
        let trace = backtrace::Backtrace::new();
        let mut frames = Vec::new();

        for frame in trace.frames() {
            let symbols = frame.symbols();
            if symbols.is_empty() {
                frames.push(format!("{:?}", frame.ip()));
                continue;
            }

            for symbol in symbols {
                let name = symbol
                    .name()
                    .map_or_else(|| "<unknown>".to_string(), |name| name.to_string());
                let location = match (symbol.filename(), symbol.lineno()) {
                    (Some(file), Some(line)) => format!(" ({}:{line})", file.display()),
                    _ => String::new(),
                };
                frames.push(format!("{name}{location}"));
            }
        }

        let skip = frames
            .iter()
            .rposition(|frame| frame.contains("CallPath::capture"))
            .map_or(0, |position| position + 1);
        CallPath::new(frames.split_off(skip.min(frames.len())))
    }

    /// Parses the `Arrays.toString(StackTraceElement[])` text produced by instrumented code.
    ///
    /// The surrounding brackets are optional. The `Thread.getStackTrace` frame that performed
    /// the capture is dropped. `null` and empty traces yield an empty path.
    #[must_use]
    pub fn from_java_trace(text: &str) -> Self {
        let text = text.trim();
        let inner = text
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(text);

        if inner.is_empty() || inner == "null" {
            return CallPath::default();
        }

        let frames = inner
            .split(", ")
            .map(str::trim)
            .filter(|frame| !frame.is_empty())
            .skip_while(|frame| is_capture_frame(frame))
            .map(str::to_string)
            .collect();
        CallPath::new(frames)
    }

    /// Frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frames were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Matches both `java.lang.Thread...` and module-qualified `java.base/java.lang.Thread...`.
fn is_capture_frame(frame: &str) -> bool {
    let unqualified = frame.split_once('/').map_or(frame, |(_, rest)| rest);
    unqualified.starts_with(GET_STACK_TRACE)
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, frame) in self.frames.iter().enumerate() {
            if position > 0 {
                writeln!(f)?;
            }
            write!(f, "{frame}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_java_trace() {
        let path = CallPath::from_java_trace(
            "[java.base/java.lang.Thread.getStackTrace(Thread.java:1610), \
             org.opencv.core.Mat.<init>(Mat.java:12), Main.main(Main.java:5)]",
        );

        assert_eq!(
            path.frames(),
            ["org.opencv.core.Mat.<init>(Mat.java:12)", "Main.main(Main.java:5)"]
        );
        assert_eq!(
            path.to_string(),
            "org.opencv.core.Mat.<init>(Mat.java:12)\nMain.main(Main.java:5)"
        );
    }

    #[test]
    fn parse_degenerate_traces() {
        assert!(CallPath::from_java_trace("[]").is_empty());
        assert!(CallPath::from_java_trace("null").is_empty());
        assert!(CallPath::from_java_trace("  ").is_empty());
        assert_eq!(CallPath::from_java_trace("A.b(A.java:1)").len(), 1);
    }

    #[test]
    fn capture_skips_itself() {
        let path = CallPath::capture();
        assert!(path
            .frames()
            .iter()
            .all(|frame| !frame.contains("CallPath::capture")));
    }
}
