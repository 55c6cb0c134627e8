// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # leakscope
//!
//! Leak tracking for JVM objects through class file instrumentation, written in pure Rust.
//!
//! `leakscope` rewrites the lifecycle methods of a single target class so that every instance
//! creation and every disposal is recorded, then reports the instances that were created but
//! never disposed together with the call path that created them. It does not need a JVM to do
//! the rewriting: class files are parsed, modified and serialized entirely in Rust.
//!
//! ## Features
//!
//! - **🔍 Complete class file model** - Constant pool, method bodies, exception tables, line
//!   numbers, local variables and stack map frames
//! - **⚙️ Bytecode assembly** - Decoder, label based encoder and `max_stack` analysis for the
//!   whole JVM instruction set
//! - **💉 Lifecycle instrumentation** - Creation blocks before every constructor return,
//!   disposal blocks at the entry of the disposal method, with branch offsets remapped
//! - **🧵 Concurrent tracking** - Sharded registry safe under unbounded concurrent use
//! - **⏱️ Cancellable reporting** - Periodic leak reports with deterministic shutdown
//!
//! ## Quick Start
//!
//! ```rust
//! use leakscope::{
//!     classfile::builder::{ClassBuilder, MethodBuilder},
//!     AgentConfig, ClassFile, ClassTransformer,
//! };
//!
//! let config = AgentConfig::parse_options("target=demo.Buffer,dispose=close")?;
//! let transformer = ClassTransformer::new(config);
//!
//! let original = ClassBuilder::new("demo/Buffer")
//!     .method(MethodBuilder::constructor("java/lang/Object"))
//!     .method(MethodBuilder::empty("close"))
//!     .build()?;
//!
//! let instrumented = transformer.transform("demo/Buffer", &original)?;
//! let class = ClassFile::parse(&instrumented)?;
//! assert_eq!(class.methods().len(), 2);
//! # Ok::<(), leakscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Bounds-checked big-endian reading and writing
//! - [`classfile`] - Class file model, constant pool and builders
//! - [`assembly`] - Instruction decoding, encoding and stack analysis
//! - [`instrument`] - The instrumentation engine
//! - [`tracking`] - Registry, call paths and the leak monitor
//! - [`config`] - Agent configuration
//! - [`Error`] and [`Result`] - Error handling
//!
//! ### Runtime side
//!
//! The injected code calls static `add`/`remove` methods on a tracker class. A tracker backed
//! by this crate forwards them to a [`Registry`], and a [`LeakMonitor`] reports on it:
//!
//! ```rust
//! use std::sync::Arc;
//! use leakscope::{tracking::MonitorConfig, AgentConfig, LeakMonitor, Registry};
//! use leakscope::tracking::ConsoleSink;
//!
//! let config = AgentConfig::default();
//! let registry = Arc::new(Registry::new());
//! let monitor = LeakMonitor::spawn(
//!     Arc::clone(&registry),
//!     MonitorConfig::from(&config),
//!     ConsoleSink::default(),
//! )?;
//!
//! registry.add_trace(17, "[java.lang.Thread.getStackTrace(Thread.java:1559), Main.main(Main.java:4)]");
//! registry.remove(17);
//!
//! monitor.stop();
//! assert!(registry.drain().is_clean());
//! # Ok::<(), leakscope::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Parsing failures of the target
//! class, and methods that cannot be rewritten safely, surface as errors instead of producing
//! unverifiable bytecode. Classes that are not the target are never parsed and never fail.
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! cargo +nightly fuzz run transform --release
//! ```
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use leakscope::prelude::*;
///
/// let transformer = ClassTransformer::new(AgentConfig::default());
/// assert_eq!(transformer.config().dispose, "release");
/// ```
pub mod prelude;

/// Bounds-checked binary access.
///
/// Provides the [`Parser`] cursor used by every parsing routine and the big-endian helpers in
/// [`file::io`].
pub mod file;

/// The Java class file model.
///
/// Parses class files into a [`ClassFile`], exposes the constant pool and method bodies, and
/// writes them back. See [`classfile::builder`] for synthesizing class files.
pub mod classfile;

/// JVM instruction decoding, encoding and stack analysis.
///
/// # Main Functions
///
/// - [`assembly::decode_stream`] - Decode a complete code array
/// - [`assembly::InstructionEncoder`] - Emit instructions with label based branches
/// - [`assembly::compute_max_stack`] - Worklist stack depth analysis
pub mod assembly;

/// Agent configuration and option parsing.
pub mod config;

/// The instrumentation engine: transformer, method rewriter and block injector.
pub mod instrument;

/// Runtime tracking: registry, call paths, reports and the leak monitor.
pub mod tracking;

/// `leakscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `leakscope` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use leakscope::{Error, ClassFile};
///
/// match ClassFile::parse(&[]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Parsed class file.
///
/// See [`classfile::ClassFile`] for the full model.
pub use classfile::ClassFile;

/// Bounds-checked big-endian reader.
pub use file::parser::Parser;

/// Agent configuration.
pub use config::{AgentConfig, TokenSource};

/// The class level entry point of the instrumentation engine and its attachment seam.
pub use instrument::{ClassFileTransformer, ClassTransformer};

/// Runtime tracking types.
pub use tracking::{CallPath, LeakMonitor, Registry, Report};
