//! JVM instruction encoding with label resolution.
//!
//! This module is the counterpart of [`crate::assembly::decoder`]. It reuses the same
//! [`crate::assembly::instructions::INSTRUCTIONS`] table through a reverse mnemonic lookup, so
//! an instruction decoded and re-emitted produces identical bytes.
//!
//! # Key Components
//!
//! - [`InstructionEncoder`] - Emits instructions into a growing code array
//! - [`LabelFixup`] / [`SwitchFixup`] - Pending branch offsets resolved in
//!   [`InstructionEncoder::finalize`]
//!
//! Branches always refer to labels. Because every JVM branch offset is relative to the opcode
//! of the branching instruction, and switch padding depends on the absolute position, the
//! encoder must see instructions in their final order; positions are never patched after the
//! fact except for the branch offsets themselves.
//!
//! # Examples
//!
//! ```rust
//! use leakscope::assembly::{InstructionEncoder, Operand};
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_instruction("aload_0", None)?;
//! encoder.emit_branch("ifnull", "done")?;
//! encoder.emit_instruction("nop", None)?;
//! encoder.define_label("done")?;
//! encoder.emit_instruction("return", None)?;
//!
//! let (bytecode, labels) = encoder.finalize()?;
//! assert_eq!(bytecode, [0x2A, 0xC6, 0x00, 0x04, 0x00, 0xB1]);
//! assert_eq!(labels["done"], 5);
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{Instruction, Operand, OperandType},
        instructions::{JvmInstruction, INSTRUCTIONS},
        opcodes,
    },
    file::io::{push_be, write_be_at},
    Error, Result,
};

/// Reverse lookup table mapping mnemonics to opcode and metadata.
static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, (u8, &'static JvmInstruction)>> =
    OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, (u8, &'static JvmInstruction)> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        INSTRUCTIONS
            .iter()
            .zip(0_u8..)
            .map(|(instruction, opcode)| (instruction.instr, (opcode, instruction)))
            .collect()
    })
}

/// A branch offset awaiting label resolution.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// Target label
    pub label: String,
    /// Position of the offset field
    pub fixup_position: usize,
    /// Size of the offset field, 2 or 4 bytes
    pub offset_size: u8,
    /// Position of the branch opcode; offsets are relative to it
    pub instruction_position: usize,
}

/// The offsets of one switch instruction awaiting label resolution.
#[derive(Debug, Clone)]
pub struct SwitchFixup {
    /// `(label, offset field position)` for the default and every case
    pub entries: Vec<(String, usize)>,
    /// Position of the switch opcode
    pub instruction_position: usize,
}

/// JVM instruction encoder.
///
/// The encoder holds mutable state for one code array; create one per method body.
#[derive(Debug, Default)]
pub struct InstructionEncoder {
    /// Generated bytecode
    bytecode: Vec<u8>,
    /// Defined labels (name -> position)
    labels: HashMap<String, u32>,
    /// Pending branch fixups
    fixups: Vec<LabelFixup>,
    /// Pending switch fixups
    switch_fixups: Vec<SwitchFixup>,
}

impl InstructionEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a non-branch instruction.
    ///
    /// Local variable instructions and `iinc` switch to their `wide` form automatically when an
    /// operand does not fit the short encoding.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidMnemonic`] for unknown mnemonics,
    /// [`crate::Error::WrongOperandType`] if the operand does not match, and
    /// [`crate::Error::InvalidBranch`] for branch and switch mnemonics, which must go through
    /// [`InstructionEncoder::emit_branch`] and the switch emitters.
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        let wide = match &operand {
            Some(Operand::Local(index)) => *index > 255,
            Some(Operand::Increment { index, delta }) => {
                *index > 255 || i8::try_from(*delta).is_err()
            }
            _ => false,
        };
        self.emit(mnemonic, operand, wide)
    }

    /// Emits a local variable instruction or `iinc` in its `wide` form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::WrongOperandType`] if the instruction cannot be widened.
    pub fn emit_wide(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        self.emit(mnemonic, operand, true)
    }

    /// Re-emits a decoded instruction, translating its absolute targets through `label_of`.
    ///
    /// Non-branch instructions keep their original encoding, including a `wide` prefix that
    /// was not strictly necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction cannot be encoded.
    pub fn emit_instruction_decoded<F>(&mut self, instruction: &Instruction, label_of: F) -> Result<()>
    where
        F: Fn(u32) -> String,
    {
        match &instruction.operand {
            Operand::Target(target) => self.emit_branch(instruction.mnemonic, &label_of(*target)),
            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            } => {
                let labels: Vec<String> = targets.iter().map(|t| label_of(*t)).collect();
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                self.emit_tableswitch(*low, *high, &label_of(*default), &labels)
            }
            Operand::LookupSwitch { default, pairs } => {
                let labels: Vec<(i32, String)> = pairs
                    .iter()
                    .map(|(key, target)| (*key, label_of(*target)))
                    .collect();
                let labels: Vec<(i32, &str)> = labels
                    .iter()
                    .map(|(key, label)| (*key, label.as_str()))
                    .collect();
                self.emit_lookupswitch(&label_of(*default), &labels)
            }
            Operand::None => self.emit(instruction.mnemonic, None, instruction.wide),
            operand => self.emit(instruction.mnemonic, Some(operand.clone()), instruction.wide),
        }
    }

    /// Emits a branch instruction to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBranch`] if `mnemonic` is not a branch or `jsr`.
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<()> {
        let (opcode, metadata) = lookup_mnemonic(mnemonic)?;

        let offset_size = match metadata.op_type {
            OperandType::Branch16 => 2,
            OperandType::Branch32 => 4,
            _ => {
                return Err(Error::InvalidBranch(format!(
                    "instruction '{mnemonic}' is not a branch instruction"
                )))
            }
        };

        let instruction_position = self.bytecode.len();
        self.bytecode.push(opcode);
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            offset_size,
            instruction_position,
        });
        self.bytecode
            .extend(std::iter::repeat(0).take(usize::from(offset_size)));

        Ok(())
    }

    /// Emits a `tableswitch` over `low..=high`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBranch`] if the number of labels does not match the range.
    pub fn emit_tableswitch(
        &mut self,
        low: i32,
        high: i32,
        default: &str,
        labels: &[&str],
    ) -> Result<()> {
        let expected = i64::from(high) - i64::from(low) + 1;
        if expected < 1 || i64::try_from(labels.len()).ok() != Some(expected) {
            return Err(Error::InvalidBranch(format!(
                "tableswitch {low}..={high} needs {expected} targets, got {}",
                labels.len()
            )));
        }

        let instruction_position = self.begin_switch(opcodes::TABLESWITCH);
        let mut entries = Vec::with_capacity(labels.len() + 1);

        entries.push((default.to_string(), self.reserve_offset()));
        push_be(&mut self.bytecode, low);
        push_be(&mut self.bytecode, high);
        for label in labels {
            entries.push(((*label).to_string(), self.reserve_offset()));
        }

        self.switch_fixups.push(SwitchFixup {
            entries,
            instruction_position,
        });
        Ok(())
    }

    /// Emits a `lookupswitch`; keys must be strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBranch`] if the keys are not sorted.
    pub fn emit_lookupswitch(&mut self, default: &str, pairs: &[(i32, &str)]) -> Result<()> {
        if pairs.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
            return Err(Error::InvalidBranch(
                "lookupswitch keys must be strictly increasing".to_string(),
            ));
        }
        let npairs = i32::try_from(pairs.len())
            .map_err(|_| Error::InvalidBranch("Too many lookupswitch pairs".to_string()))?;

        let instruction_position = self.begin_switch(opcodes::LOOKUPSWITCH);
        let mut entries = Vec::with_capacity(pairs.len() + 1);

        entries.push((default.to_string(), self.reserve_offset()));
        push_be(&mut self.bytecode, npairs);
        for (key, label) in pairs {
            push_be(&mut self.bytecode, *key);
            entries.push(((*label).to_string(), self.reserve_offset()));
        }

        self.switch_fixups.push(SwitchFixup {
            entries,
            instruction_position,
        });
        Ok(())
    }

    /// Emits an `int` constant using the most compact form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::WrongOperandType`] if `value` does not fit `sipush`; larger
    /// values need an `Integer` constant and [`InstructionEncoder::emit_ldc`].
    pub fn emit_iconst(&mut self, value: i32) -> Result<()> {
        match value {
            -1 => self.emit_instruction("iconst_m1", None),
            0 => self.emit_instruction("iconst_0", None),
            1 => self.emit_instruction("iconst_1", None),
            2 => self.emit_instruction("iconst_2", None),
            3 => self.emit_instruction("iconst_3", None),
            4 => self.emit_instruction("iconst_4", None),
            5 => self.emit_instruction("iconst_5", None),
            x => match (i8::try_from(x), i16::try_from(x)) {
                (Ok(byte), _) => self.emit_instruction("bipush", Some(Operand::Byte(byte))),
                (_, Ok(short)) => self.emit_instruction("sipush", Some(Operand::Short(short))),
                _ => Err(Error::WrongOperandType {
                    expected: format!("an int constant pool entry for {x}"),
                }),
            },
        }
    }

    /// Emits `ldc` or `ldc_w` depending on the constant pool index.
    ///
    /// # Errors
    ///
    /// Never fails for valid indices; kept fallible for symmetry with the other emitters.
    pub fn emit_ldc(&mut self, index: u16) -> Result<()> {
        if index <= 255 {
            self.emit_instruction("ldc", Some(Operand::Constant(index)))
        } else {
            self.emit_instruction("ldc_w", Some(Operand::Constant(index)))
        }
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateLabel`] if the label already exists.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        let position = self.current_position();
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Current position in the code array.
    #[must_use]
    pub fn current_position(&self) -> u32 {
        u32::try_from(self.bytecode.len()).unwrap_or(u32::MAX)
    }

    /// Position of a defined label.
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// Resolves all branch offsets and returns the code with the final label positions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UndefinedLabel`] for unresolved labels and
    /// [`crate::Error::BranchOutOfRange`] if a 16-bit offset overflows.
    pub fn finalize(mut self) -> Result<(Vec<u8>, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let target = self.resolve(&fixup.label)?;
            let offset = i64::from(target) - fixup.instruction_position as i64;
            let mut position = fixup.fixup_position;

            if fixup.offset_size == 2 {
                let offset = i16::try_from(offset).map_err(|_| Error::BranchOutOfRange {
                    offset: fixup.instruction_position as u32,
                    target,
                })?;
                write_be_at(&mut self.bytecode, &mut position, offset)?;
            } else {
                let offset = i32::try_from(offset)
                    .map_err(|_| malformed_error!("Branch offset {} exceeds i32", offset))?;
                write_be_at(&mut self.bytecode, &mut position, offset)?;
            }
        }

        let switch_fixups = std::mem::take(&mut self.switch_fixups);
        for fixup in &switch_fixups {
            for (label, position) in &fixup.entries {
                let target = self.resolve(label)?;
                let offset = i64::from(target) - fixup.instruction_position as i64;
                let offset = i32::try_from(offset)
                    .map_err(|_| malformed_error!("Switch offset {} exceeds i32", offset))?;
                let mut position = *position;
                write_be_at(&mut self.bytecode, &mut position, offset)?;
            }
        }

        Ok((self.bytecode, self.labels))
    }

    fn resolve(&self, label: &str) -> Result<u32> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
    }

    fn begin_switch(&mut self, opcode: u8) -> usize {
        let instruction_position = self.bytecode.len();
        self.bytecode.push(opcode);
        while self.bytecode.len() % 4 != 0 {
            self.bytecode.push(0);
        }
        instruction_position
    }

    fn reserve_offset(&mut self) -> usize {
        let position = self.bytecode.len();
        self.bytecode.extend_from_slice(&[0, 0, 0, 0]);
        position
    }

    fn emit(&mut self, mnemonic: &str, operand: Option<Operand>, wide: bool) -> Result<()> {
        let (opcode, metadata) = lookup_mnemonic(mnemonic)?;

        if wide && !matches!(metadata.op_type, OperandType::Local | OperandType::Increment) {
            return Err(Error::WrongOperandType {
                expected: format!("no wide form for '{mnemonic}'"),
            });
        }
        if wide {
            self.bytecode.push(opcodes::WIDE);
        }
        self.bytecode.push(opcode);

        let wrong = |expected: &str| Error::WrongOperandType {
            expected: format!("{expected} for '{mnemonic}'"),
        };

        match (metadata.op_type, operand) {
            (OperandType::None, None) => {}
            (OperandType::Int8, Some(Operand::Byte(value))) => push_be(&mut self.bytecode, value),
            (OperandType::Int16, Some(Operand::Short(value))) => {
                push_be(&mut self.bytecode, value);
            }
            (OperandType::Local, Some(Operand::Local(index))) => {
                if wide {
                    push_be(&mut self.bytecode, index);
                } else {
                    let index = u8::try_from(index).map_err(|_| wrong("local index <= 255"))?;
                    self.bytecode.push(index);
                }
            }
            (OperandType::Constant8, Some(Operand::Constant(index))) => {
                let index = u8::try_from(index).map_err(|_| wrong("constant index <= 255"))?;
                self.bytecode.push(index);
            }
            (OperandType::Constant16, Some(Operand::Constant(index))) => {
                push_be(&mut self.bytecode, index);
            }
            (OperandType::Increment, Some(Operand::Increment { index, delta })) => {
                if wide {
                    push_be(&mut self.bytecode, index);
                    push_be(&mut self.bytecode, delta);
                } else {
                    let index = u8::try_from(index).map_err(|_| wrong("local index <= 255"))?;
                    let delta = i8::try_from(delta).map_err(|_| wrong("increment in i8"))?;
                    self.bytecode.push(index);
                    push_be(&mut self.bytecode, delta);
                }
            }
            (OperandType::InvokeInterface, Some(Operand::InvokeInterface { index, count })) => {
                push_be(&mut self.bytecode, index);
                self.bytecode.push(count);
                self.bytecode.push(0);
            }
            (OperandType::InvokeDynamic, Some(Operand::Constant(index))) => {
                push_be(&mut self.bytecode, index);
                push_be(&mut self.bytecode, 0_u16);
            }
            (OperandType::ArrayType, Some(Operand::ArrayType(code))) => self.bytecode.push(code),
            (OperandType::MultiANewArray, Some(Operand::MultiArray { index, dimensions })) => {
                push_be(&mut self.bytecode, index);
                self.bytecode.push(dimensions);
            }
            (
                OperandType::Branch16
                | OperandType::Branch32
                | OperandType::TableSwitch
                | OperandType::LookupSwitch,
                _,
            ) => {
                return Err(Error::InvalidBranch(format!(
                    "'{mnemonic}' must be emitted through a label"
                )))
            }
            (op_type, _) => return Err(wrong(&format!("{op_type:?} operand"))),
        }

        Ok(())
    }
}

fn lookup_mnemonic(mnemonic: &str) -> Result<(u8, &'static JvmInstruction)> {
    get_mnemonic_lookup()
        .get(mnemonic)
        .copied()
        .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
}
