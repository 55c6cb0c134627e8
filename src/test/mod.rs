//! Fixtures shared by the unit tests.
//!
//! Class files are synthesized with the public builders instead of being checked in, so each
//! fixture documents exactly which constructs it contains.

pub mod factories;
