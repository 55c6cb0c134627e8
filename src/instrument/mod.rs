//! Lifecycle instrumentation of the target class.
//!
//! The engine is layered the same way a class load flows through it:
//!
//! - [`ClassTransformer`] - Matches the class name, drives the rewrite and re-serializes
//! - [`MethodRewriter`] - Splices blocks into one method body and remaps its offset tables
//! - [`Injector`] - Builds the tracking block and lowers it into instructions
//!
//! Attachment layers talk to the engine through the [`ClassFileTransformer`] trait.

mod injector;
mod rewriter;
mod transformer;

pub use injector::{BlockInstruction, EventKind, Injector};
pub use rewriter::{InstrumentationPoint, MethodRewriter, RewrittenCode};
pub use transformer::{ClassFileTransformer, ClassTransformer, InstrumentedMethod, TransformSummary};
