//! JVM bytecode decoding, encoding and stack analysis.
//!
//! This module covers the instruction level of a method body: turning a `code` array into
//! [`Instruction`]s, emitting new code through the label based [`InstructionEncoder`] and
//! recomputing `max_stack`/`max_locals` once code has been changed.
//!
//! # Key Types
//! - [`Instruction`] - A decoded instruction with absolute branch targets
//! - [`Operand`] - Instruction operands
//! - [`FlowType`] - How instructions affect control flow
//! - [`InstructionEncoder`] - Emits instructions and resolves labels
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_stream`] - Decode a complete code array
//! - [`compute_max_stack`] / [`compute_max_locals`] - Method limits for rewritten code
//!
//! # Example
//! ```rust
//! use leakscope::assembly::decode_stream;
//!
//! let code = [0x2A, 0xB7, 0x00, 0x01, 0xB1]; // aload_0; invokespecial #1; return
//! for instruction in decode_stream(&code)? {
//!     println!("{instruction}");
//! }
//! # Ok::<(), leakscope::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
pub mod opcodes;
mod stack;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{InstructionEncoder, LabelFixup, SwitchFixup};
pub use instruction::{array_type_name, FlowType, Instruction, Operand, OperandType, StackBehavior};
pub use instructions::{lookup, JvmInstruction, INSTRUCTIONS};
pub use stack::{compute_max_locals, compute_max_stack, stack_effect, update_limits};
