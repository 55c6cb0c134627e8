//! Low-level binary access shared by the class file and bytecode layers.
//!
//! # Key Components
//!
//! - [`crate::file::parser::Parser`] - Cursor-based, bounds-checked reader
//! - [`crate::file::io`] - Big-endian primitive reading and writing helpers
//!
//! Class files always arrive as complete in-memory buffers. Callers that start from disk read the
//! file into a `Vec<u8>` first.

pub mod io;
pub mod parser;
