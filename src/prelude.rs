//! # leakscope Prelude
//!
//! The most commonly used types of the library, for glob imports.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all leakscope operations
pub use crate::Error;

/// The result type used throughout leakscope
pub use crate::Result;

// ================================================================================================
// Class Files
// ================================================================================================

/// Parsed class file and its main parts
pub use crate::classfile::{
    ClassFile, CodeAttribute, ConstantPool, MethodAccessFlags, MethodDescriptor, MethodInfo,
};

/// Class file synthesis
pub use crate::classfile::builder::{ClassBuilder, MethodBuilder};

/// Instruction decoding and encoding
pub use crate::assembly::{decode_stream, Instruction, InstructionEncoder, Operand};

// ================================================================================================
// Instrumentation
// ================================================================================================

/// Configuration and the instrumentation entry points
pub use crate::{
    config::{AgentConfig, TokenSource},
    instrument::{ClassFileTransformer, ClassTransformer, EventKind, TransformSummary},
};

// ================================================================================================
// Tracking Runtime
// ================================================================================================

/// Registry, monitor and report sinks
pub use crate::tracking::{
    CallPath, ConsoleSink, IdentityToken, LeakMonitor, LogSink, MonitorConfig, Registry, Report,
    ReportSink, TokenAllocator,
};
