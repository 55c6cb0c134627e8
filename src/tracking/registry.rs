//! Concurrent registry of live tracked objects.
//!
//! The [`Registry`] maps identity tokens to the creation context captured when the object was
//! constructed. Instrumented constructors call [`Registry::add`] (or [`Registry::add_trace`]
//! with the JVM's stack text), instrumented disposal methods call [`Registry::remove`]. The map
//! is sharded, so threads working on unrelated tokens never contend, and a reader taking a
//! [`Registry::snapshot`] only holds each shard briefly.
//!
//! Tokens are not guaranteed to be unique. A second `add` for a token overwrites the earlier
//! record, and removing a token that is not present does nothing.
//!
//! # Examples
//!
//! ```rust
//! use leakscope::{CallPath, Registry};
//!
//! let registry = Registry::new();
//! registry.add(7, CallPath::new(vec!["Main.main(Main.java:3)".into()]));
//! registry.add_trace(8, "[Main.main(Main.java:4)]");
//! assert!(registry.remove(7));
//! assert!(!registry.remove(42));
//!
//! let report = registry.snapshot();
//! assert_eq!(report.count, 1);
//! assert!(report.contexts.contains("Main.main(Main.java:4)"));
//! ```

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use crate::tracking::{callpath::CallPath, report::Report, token::IdentityToken};

/// One object believed to be live.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    /// Identity token assigned at creation
    pub token: IdentityToken,
    /// Call path that created the object
    pub context: Arc<CallPath>,
    /// When the record was inserted
    pub created_at: Instant,
}

impl TrackedObject {
    /// Time elapsed since the object was recorded.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Thread-safe map from identity token to [`TrackedObject`].
#[derive(Debug, Default)]
pub struct Registry {
    objects: DashMap<IdentityToken, TrackedObject>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Registry {
            objects: DashMap::new(),
        }
    }

    /// Records a creation, replacing any earlier record for the same token.
    pub fn add(&self, token: IdentityToken, context: CallPath) {
        self.objects.insert(
            token,
            TrackedObject {
                token,
                context: Arc::new(context),
                created_at: Instant::now(),
            },
        );
    }

    /// Records a creation whose context is the `Arrays.toString` text of a JVM stack trace.
    pub fn add_trace(&self, token: IdentityToken, trace: &str) {
        self.add(token, CallPath::from_java_trace(trace));
    }

    /// Records a disposal. Returns `false` if the token was not tracked.
    pub fn remove(&self, token: IdentityToken) -> bool {
        self.objects.remove(&token).is_some()
    }

    /// Returns `true` if `token` is currently tracked.
    #[must_use]
    pub fn contains(&self, token: IdentityToken) -> bool {
        self.objects.contains_key(&token)
    }

    /// Returns a copy of the record for `token`.
    #[must_use]
    pub fn get(&self, token: IdentityToken) -> Option<TrackedObject> {
        self.objects.get(&token).map(|entry| entry.value().clone())
    }

    /// Number of tracked objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Takes a point-in-time report of the outstanding objects.
    ///
    /// Individual records are read atomically, but the snapshot as a whole is not
    /// linearizable with concurrent `add` and `remove` calls.
    #[must_use]
    pub fn snapshot(&self) -> Report {
        let mut count = 0;
        let mut contexts = BTreeSet::new();
        for entry in &self.objects {
            count += 1;
            contexts.insert(entry.value().context.to_string());
        }
        Report::new(count, contexts)
    }

    /// Removes every record and reports what was left.
    ///
    /// Used at teardown, after the monitor has stopped, to produce the final leak report.
    /// Records added concurrently with the drain may survive it.
    pub fn drain(&self) -> Report {
        let tokens: Vec<IdentityToken> = self.objects.iter().map(|entry| *entry.key()).collect();

        let mut count = 0;
        let mut contexts = BTreeSet::new();
        for token in tokens {
            if let Some((_, object)) = self.objects.remove(&token) {
                count += 1;
                contexts.insert(object.context.to_string());
            }
        }
        Report::new(count, contexts)
    }
}
