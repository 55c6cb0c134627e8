use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers every failure mode of class file parsing, bytecode rewriting and the
/// tracking runtime. Each variant carries enough context to tell a malformed input apart from
/// an input that is well-formed but cannot be instrumented safely.
///
/// # Error Categories
///
/// ## Class File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::InvalidOpcode`] - Reserved or unknown bytecode opcode
///
/// ## Rewriting Errors
/// - [`Error::BranchOutOfRange`] - A 16-bit branch offset no longer fits after insertion
/// - [`Error::StackUnderflow`] - Stack analysis popped below zero
/// - [`Error::InconsistentStack`] - Two control flow paths disagree on the stack height
/// - [`Error::ConstantPoolOverflow`] - The constant pool would exceed 65535 entries
/// - [`Error::ClassNameMismatch`] - Supplied class name disagrees with the class bytes
/// - [`Error::MissingCode`] - A concrete target method has no `Code` attribute
///
/// ## Assembly Errors
/// - [`Error::InvalidMnemonic`] - Unknown instruction mnemonic
/// - [`Error::WrongOperandType`] - Operand does not match the instruction
/// - [`Error::InvalidBranch`] - Branch or switch could not be encoded
/// - [`Error::UndefinedLabel`] / [`Error::DuplicateLabel`] - Label resolution failures
///
/// ## Runtime and Configuration Errors
/// - [`Error::InvalidConfig`] - Agent options could not be parsed
/// - [`Error::FileError`] - I/O failures, including spawning monitor threads
///
/// # Examples
///
/// ```rust
/// use leakscope::{ClassFile, Error};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => unreachable!(),
///     Err(Error::OutOfBounds { .. }) => println!("truncated class file"),
///     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    ///
    /// This is a safety check to prevent buffer overruns when a length or offset field points
    /// past the end of the data.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors from reading or writing class files and from spawning the
    /// monitor threads.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// An opcode byte that is reserved or not defined by the JVM specification.
    #[error("Invalid opcode 0x{opcode:02X} at offset {offset}")]
    InvalidOpcode {
        /// The offending opcode byte
        opcode: u8,
        /// Bytecode offset of the instruction
        offset: u32,
    },

    /// A branch can no longer be encoded after code was inserted.
    ///
    /// Branch instructions with 16-bit offsets can reach at most 32767 bytes. Rather than
    /// emitting broken bytecode, the rewrite is aborted.
    #[error("Branch at offset {offset} to {target} exceeds the 16-bit offset range")]
    BranchOutOfRange {
        /// New offset of the branch instruction
        offset: u32,
        /// New offset of the branch target
        target: u32,
    },

    /// The operand stack would underflow at the given instruction.
    #[error("Operand stack underflow at offset {offset}")]
    StackUnderflow {
        /// Bytecode offset of the instruction
        offset: u32,
    },

    /// Two control flow paths reach the same instruction with different stack heights.
    #[error("Inconsistent stack height at offset {offset}: {expected} vs {found}")]
    InconsistentStack {
        /// Bytecode offset of the merge point
        offset: u32,
        /// Height recorded first
        expected: u32,
        /// Height found on another path
        found: u32,
    },

    /// The constant pool cannot grow any further.
    #[error("Constant pool exceeds the maximum of 65535 entries")]
    ConstantPoolOverflow,

    /// The class name passed by the runtime does not match `this_class` in the class bytes.
    #[error("Class name mismatch - expected {expected}, found {found}")]
    ClassNameMismatch {
        /// Name supplied by the caller
        expected: String,
        /// Name recorded in the class file
        found: String,
    },

    /// A concrete method selected for instrumentation has no `Code` attribute.
    #[error("Method {0} has no Code attribute")]
    MissingCode(String),

    /// The mnemonic is not a JVM instruction.
    #[error("Invalid mnemonic - {0}")]
    InvalidMnemonic(String),

    /// The operand passed to the encoder does not fit the instruction.
    #[error("Wrong operand type - expected {expected}")]
    WrongOperandType {
        /// Description of the expected operand
        expected: String,
    },

    /// A branch or switch instruction was emitted incorrectly.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A branch refers to a label that was never defined.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// Agent options or builder input could not be parsed.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
