//! JVM instruction representation, operand types and decoding metadata.
//!
//! This module defines the types produced by [`crate::assembly::decode_stream`] and consumed by
//! [`crate::assembly::InstructionEncoder`] and the stack analysis. Branch and switch operands
//! are stored as absolute bytecode offsets rather than the relative offsets found on disk, so
//! instructions can be moved without recomputing their targets by hand.
//!
//! # Key Components
//!
//! - [`Instruction`] - A decoded instruction with location and metadata
//! - [`Operand`] - Typed operand values
//! - [`OperandType`] - Operand encoding of each opcode
//! - [`FlowType`] - Control flow classification
//! - [`StackBehavior`] - Operand stack effect in slots

use std::fmt;

use crate::assembly::opcodes;

/// Operand encodings used by JVM instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed byte immediate (`bipush`)
    Int8,
    /// Signed short immediate (`sipush`)
    Int16,
    /// Local variable slot, one byte or two under `wide`
    Local,
    /// One-byte constant pool index (`ldc`)
    Constant8,
    /// Two-byte constant pool index
    Constant16,
    /// Local slot and signed increment (`iinc`)
    Increment,
    /// Two-byte relative branch offset
    Branch16,
    /// Four-byte relative branch offset
    Branch32,
    /// Constant pool index, argument count and a zero byte
    InvokeInterface,
    /// Constant pool index and two zero bytes
    InvokeDynamic,
    /// Primitive array type code (`newarray`)
    ArrayType,
    /// Constant pool index and dimension count
    MultiANewArray,
    /// Padded jump table
    TableSwitch,
    /// Padded match-offset pairs
    LookupSwitch,
    /// The `wide` prefix itself
    Wide,
}

/// A decoded operand.
///
/// [`Operand::Target`] and the switch variants hold absolute bytecode offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// `bipush` value
    Byte(i8),
    /// `sipush` value
    Short(i16),
    /// Local variable slot
    Local(u16),
    /// Constant pool index
    Constant(u16),
    /// `iinc` operands
    Increment {
        /// Local variable slot
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// `invokeinterface` operands
    InvokeInterface {
        /// `InterfaceMethodref` index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `newarray` element type code
    ArrayType(u8),
    /// `multianewarray` operands
    MultiArray {
        /// `Class` index of the array type
        index: u16,
        /// Number of dimensions to create
        dimensions: u8,
    },
    /// Absolute branch target
    Target(u32),
    /// `tableswitch` operands
    TableSwitch {
        /// Absolute default target
        default: u32,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// Absolute targets for `low..=high`
        targets: Vec<u32>,
    },
    /// `lookupswitch` operands
    LookupSwitch {
        /// Absolute default target
        default: u32,
        /// Sorted `(key, absolute target)` pairs
        pairs: Vec<(i32, u32)>,
    },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Byte(value) => write!(f, "{value}"),
            Operand::Short(value) => write!(f, "{value}"),
            Operand::Local(index) => write!(f, "{index}"),
            Operand::Constant(index) => write!(f, "#{index}"),
            Operand::Increment { index, delta } => write!(f, "{index}, {delta}"),
            Operand::InvokeInterface { index, count } => write!(f, "#{index}, {count}"),
            Operand::ArrayType(code) => write!(f, "{}", array_type_name(*code)),
            Operand::MultiArray { index, dimensions } => write!(f, "#{index}, {dimensions}"),
            Operand::Target(target) => write!(f, "{target}"),
            Operand::TableSwitch {
                default,
                low,
                targets,
                ..
            } => {
                write!(f, "{{ ")?;
                for (position, target) in targets.iter().enumerate() {
                    write!(f, "{}: {target}; ", low.wrapping_add(position as i32))?;
                }
                write!(f, "default: {default} }}")
            }
            Operand::LookupSwitch { default, pairs } => {
                write!(f, "{{ ")?;
                for (key, target) in pairs {
                    write!(f, "{key}: {target}; ")?;
                }
                write!(f, "default: {default} }}")
            }
        }
    }
}

/// Name of a `newarray` element type code.
#[must_use]
pub fn array_type_name(code: u8) -> &'static str {
    match code {
        4 => "boolean",
        5 => "char",
        6 => "float",
        7 => "double",
        8 => "byte",
        9 => "short",
        10 => "int",
        11 => "long",
        _ => "?",
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Multi-way branch (`tableswitch`, `lookupswitch`)
    Switch,
    /// Returns from the method
    Return,
    /// Throws (`athrow`)
    Throw,
    /// Subroutine call (`jsr`, `jsr_w`)
    Subroutine,
    /// Subroutine return (`ret`)
    SubroutineReturn,
}

/// Operand stack effect of an instruction, counted in slots.
///
/// `long` and `double` values take two slots, so `ladd` pops 4 and pushes 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackBehavior {
    /// Effect known from the opcode alone
    Fixed {
        /// Slots popped
        pops: u8,
        /// Slots pushed
        pushes: u8,
    },
    /// Effect depends on a descriptor in the constant pool or on an operand
    Dynamic,
}

/// A decoded JVM instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode from the start of the code array
    pub offset: u32,
    /// Encoded size in bytes, including a `wide` prefix and switch padding
    pub size: u32,
    /// Opcode byte (never `wide`; see [`Instruction::wide`])
    pub opcode: u8,
    /// Whether the instruction was prefixed by `wide`
    pub wide: bool,
    /// Mnemonic, e.g. `invokestatic`
    pub mnemonic: &'static str,
    /// Control flow classification
    pub flow_type: FlowType,
    /// Operand value
    pub operand: Operand,
    /// Stack effect
    pub stack_behavior: StackBehavior,
    /// Absolute branch targets, default target last for switches
    pub branch_targets: Vec<u32>,
}

impl Instruction {
    /// Returns `true` for branches, switches and subroutine calls.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Subroutine
        )
    }

    /// Returns `true` if execution never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::SubroutineReturn
        )
    }

    /// Returns `true` for the `*return` family.
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.flow_type == FlowType::Return
    }

    /// Absolute branch targets.
    #[must_use]
    pub fn get_targets(&self) -> &[u32] {
        &self.branch_targets
    }

    /// Offset of the following instruction.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    /// Constant pool index referenced by the instruction, if any.
    #[must_use]
    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Constant(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::MultiArray { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Local variable slot and width accessed by the instruction, if any.
    ///
    /// Covers explicit and implicit loads and stores, `iinc` and `ret`.
    #[must_use]
    pub fn local_access(&self) -> Option<(u16, u16)> {
        // Type groups in opcode order: int, long, float, double, reference
        let width = |group: u8| if group == 1 || group == 3 { 2 } else { 1 };

        match self.opcode {
            opcodes::ILOAD..=opcodes::ALOAD => match self.operand {
                Operand::Local(index) => Some((index, width(self.opcode - opcodes::ILOAD))),
                _ => None,
            },
            opcodes::ISTORE..=opcodes::ASTORE => match self.operand {
                Operand::Local(index) => Some((index, width(self.opcode - opcodes::ISTORE))),
                _ => None,
            },
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let relative = self.opcode - opcodes::ILOAD_0;
                Some((u16::from(relative % 4), width(relative / 4)))
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let relative = self.opcode - opcodes::ISTORE_0;
                Some((u16::from(relative % 4), width(relative / 4)))
            }
            opcodes::IINC => match self.operand {
                Operand::Increment { index, .. } => Some((index, 1)),
                _ => None,
            },
            opcodes::RET => match self.operand {
                Operand::Local(index) => Some((index, 1)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: ", self.offset)?;
        if self.wide {
            write!(f, "wide ")?;
        }
        match self.operand {
            Operand::None => write!(f, "{}", self.mnemonic),
            _ => write!(f, "{} {}", self.mnemonic, self.operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(opcode: u8, mnemonic: &'static str, operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            size: 1,
            opcode,
            wide: false,
            mnemonic,
            flow_type: FlowType::Sequential,
            operand,
            stack_behavior: StackBehavior::Fixed { pops: 0, pushes: 1 },
            branch_targets: Vec::new(),
        }
    }

    #[test]
    fn local_access_implicit_forms() {
        let lload_3 = instruction(opcodes::LLOAD_3, "lload_3", Operand::None);
        assert_eq!(lload_3.local_access(), Some((3, 2)));

        let astore_1 = instruction(opcodes::ASTORE_1, "astore_1", Operand::None);
        assert_eq!(astore_1.local_access(), Some((1, 1)));

        let dstore_0 = instruction(opcodes::DSTORE_0, "dstore_0", Operand::None);
        assert_eq!(dstore_0.local_access(), Some((0, 2)));
    }

    #[test]
    fn local_access_explicit_forms() {
        let dload = instruction(opcodes::DLOAD, "dload", Operand::Local(300));
        assert_eq!(dload.local_access(), Some((300, 2)));

        let iinc = instruction(
            opcodes::IINC,
            "iinc",
            Operand::Increment { index: 7, delta: -1 },
        );
        assert_eq!(iinc.local_access(), Some((7, 1)));

        let nop = instruction(opcodes::NOP, "nop", Operand::None);
        assert_eq!(nop.local_access(), None);
    }

    #[test]
    fn display() {
        let mut ldc = instruction(opcodes::LDC, "ldc", Operand::Constant(4));
        ldc.offset = 12;
        assert_eq!(ldc.to_string(), "   12: ldc #4");

        let switch = Operand::TableSwitch {
            default: 30,
            low: 1,
            high: 2,
            targets: vec![20, 25],
        };
        assert_eq!(switch.to_string(), "{ 1: 20; 2: 25; default: 30 }");
    }
}
