//! Configuration for the instrumentation agent.
//!
//! [`AgentConfig`] names the target type, its disposal method, the tracker class the injected
//! code calls into and how identity tokens are obtained. The defaults reproduce the classic
//! OpenCV `Mat` leak agent, so an agent started without options behaves like it.
//!
//! Options arrive either programmatically through the `with_*` setters or as the agent option
//! string handed over by the attachment layer, parsed by [`AgentConfig::parse_options`]:
//!
//! ```rust
//! use std::time::Duration;
//! use leakscope::{AgentConfig, TokenSource};
//!
//! let config = AgentConfig::parse_options("target=com.example.Buffer, dispose=close, interval=10")?;
//! assert_eq!(config.target, "com/example/Buffer");
//! assert_eq!(config.dispose, "close");
//! assert_eq!(config.interval, Duration::from_secs(10));
//! assert_eq!(config.token, TokenSource::Identity);
//! assert_eq!(config.created_label(), "[Agent] Buffer object created: ");
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::{str::FromStr, time::Duration};

use strum::{Display, EnumString};

use crate::{Error, Result};

/// Default target type, in internal form.
pub const DEFAULT_TARGET: &str = "org/opencv/core/Mat";
/// Default disposal method name.
pub const DEFAULT_DISPOSE: &str = "release";
/// Default tracker class, in internal form.
pub const DEFAULT_TRACKER: &str = "leakscope/Tracker";
/// Default monitor interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// How the injected code obtains an object's identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TokenSource {
    /// `System.identityHashCode(this)`; cheap but not unique
    #[default]
    Identity,
    /// `<tracker>.token(this)`, letting the tracker hand out unique tokens
    Tracker,
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Target type in internal form (default: `org/opencv/core/Mat`).
    pub target: String,

    /// Name of the zero-argument disposal method (default: `release`).
    pub dispose: String,

    /// Class providing the static `add`/`remove`/`token` entry points (default: `leakscope/Tracker`).
    pub tracker: String,

    /// Identity token source (default: [`TokenSource::Identity`]).
    pub token: TokenSource,

    /// Leak monitor interval (default: 5 seconds).
    pub interval: Duration,

    /// Label printed on creation; derived from the target name when unset.
    pub created_label: Option<String>,

    /// Label printed on disposal; derived from the target name when unset.
    pub released_label: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            target: DEFAULT_TARGET.to_string(),
            dispose: DEFAULT_DISPOSE.to_string(),
            tracker: DEFAULT_TRACKER.to_string(),
            token: TokenSource::default(),
            interval: DEFAULT_INTERVAL,
            created_label: None,
            released_label: None,
        }
    }
}

impl AgentConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma separated `key=value` option string on top of the defaults.
    ///
    /// Recognized keys are `target`, `dispose`, `tracker`, `token`, `interval` (whole seconds),
    /// `created_label` and `released_label`. Whitespace around keys and values is ignored and
    /// an empty string yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for unknown keys, entries without `=`, empty
    /// names and invalid values.
    pub fn parse_options(options: &str) -> Result<AgentConfig> {
        let mut config = AgentConfig::default();

        for entry in options.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::InvalidConfig(format!("Expected key=value, got '{entry}'")));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "target" => config.target = internal_name(key, value)?,
                "dispose" => config.dispose = identifier(key, value)?.to_string(),
                "tracker" => config.tracker = internal_name(key, value)?,
                "token" => {
                    config.token = TokenSource::from_str(value).map_err(|_| {
                        Error::InvalidConfig(format!(
                            "token must be 'identity' or 'tracker', got '{value}'"
                        ))
                    })?;
                }
                "interval" => {
                    let seconds = value.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                        Error::InvalidConfig(format!(
                            "interval must be a positive number of seconds, got '{value}'"
                        ))
                    })?;
                    config.interval = Duration::from_secs(seconds);
                }
                "created_label" => config.created_label = Some(value.to_string()),
                "released_label" => config.released_label = Some(value.to_string()),
                _ => return Err(Error::InvalidConfig(format!("Unknown option '{key}'"))),
            }
        }

        Ok(config)
    }

    /// Sets the target type; dotted names are converted to internal form.
    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.replace('.', "/");
        self
    }

    /// Sets the disposal method name.
    #[must_use]
    pub fn with_dispose(mut self, dispose: impl Into<String>) -> Self {
        self.dispose = dispose.into();
        self
    }

    /// Sets the tracker class; dotted names are converted to internal form.
    #[must_use]
    pub fn with_tracker(mut self, tracker: &str) -> Self {
        self.tracker = tracker.replace('.', "/");
        self
    }

    /// Sets the identity token source.
    #[must_use]
    pub fn with_token(mut self, token: TokenSource) -> Self {
        self.token = token;
        self
    }

    /// Sets the monitor interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides both printed labels.
    #[must_use]
    pub fn with_labels(mut self, created: impl Into<String>, released: impl Into<String>) -> Self {
        self.created_label = Some(created.into());
        self.released_label = Some(released.into());
        self
    }

    /// Returns `true` if `class_name`, in internal or dotted form, names the target type.
    #[must_use]
    pub fn is_target(&self, class_name: &str) -> bool {
        class_name.len() == self.target.len()
            && class_name
                .bytes()
                .zip(self.target.bytes())
                .all(|(a, b)| a == b || (a == b'.' && b == b'/'))
    }

    /// Unqualified name of the target type, e.g. `Mat`.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.target.rsplit('/').next().unwrap_or(&self.target)
    }

    /// Label printed before the token of a created object.
    #[must_use]
    pub fn created_label(&self) -> String {
        self.created_label
            .clone()
            .unwrap_or_else(|| format!("[Agent] {} object created: ", self.simple_name()))
    }

    /// Label printed before the token of a released object.
    #[must_use]
    pub fn released_label(&self) -> String {
        self.released_label
            .clone()
            .unwrap_or_else(|| format!("[Agent] {} object released: ", self.simple_name()))
    }
}

fn identifier<'a>(key: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value.contains(['/', '.', ';', '[', '<', '>']) {
        return Err(Error::InvalidConfig(format!(
            "{key} must be a plain method name, got '{value}'"
        )));
    }
    Ok(value)
}

fn internal_name(key: &str, value: &str) -> Result<String> {
    let name = value.replace('.', "/");
    if name.is_empty() || name.split('/').any(str::is_empty) || name.contains([';', '[']) {
        return Err(Error::InvalidConfig(format!(
            "{key} must be a class name, got '{value}'"
        )));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_mat_agent() {
        let config = AgentConfig::parse_options("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.target, "org/opencv/core/Mat");
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.created_label(), "[Agent] Mat object created: ");
        assert_eq!(config.released_label(), "[Agent] Mat object released: ");
    }

    #[test]
    fn parse_all_keys() {
        let config = AgentConfig::parse_options(
            "target=a.b.C,dispose=free,tracker=x/Y,token=tracker,interval=2,created_label=+,released_label=-",
        )
        .unwrap();

        assert_eq!(config.target, "a/b/C");
        assert_eq!(config.dispose, "free");
        assert_eq!(config.tracker, "x/Y");
        assert_eq!(config.token, TokenSource::Tracker);
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.created_label(), "+");
        assert_eq!(config.released_label(), "-");
    }

    #[test]
    fn reject_invalid_options() {
        for options in [
            "bogus=1",
            "target",
            "target=",
            "target=a..b",
            "interval=0",
            "interval=soon",
            "token=hash",
            "dispose=a.b",
        ] {
            assert!(
                matches!(AgentConfig::parse_options(options), Err(Error::InvalidConfig(_))),
                "{options}"
            );
        }
    }

    #[test]
    fn target_matching() {
        let config = AgentConfig::new().with_target("com.example.Buffer");
        assert!(config.is_target("com/example/Buffer"));
        assert!(config.is_target("com.example.Buffer"));
        assert!(!config.is_target("com/example/BufferPool"));
        assert!(!config.is_target("com/example/Buf"));
        assert_eq!(config.simple_name(), "Buffer");
    }

    #[test]
    fn token_source_strings() {
        assert_eq!(TokenSource::Tracker.to_string(), "tracker");
        assert_eq!(TokenSource::from_str("identity").unwrap(), TokenSource::Identity);
    }
}
