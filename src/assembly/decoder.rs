//! JVM bytecode decoding.
//!
//! This module turns the raw `code` array of a method into a list of [`Instruction`]s. Decoding
//! is table driven through [`crate::assembly::instructions::INSTRUCTIONS`], handles the `wide`
//! prefix and the 4-byte alignment of `tableswitch`/`lookupswitch` operands, and converts every
//! relative branch offset into an absolute target.
//!
//! # Key Components
//!
//! - [`decode_instruction`] - Decodes one instruction at the parser position
//! - [`decode_stream`] - Decodes a complete code array and validates branch targets
//!
//! # Examples
//!
//! ```rust
//! use leakscope::assembly::{decode_stream, Operand};
//!
//! // aload_0; ifnull +4; nop; return
//! let code = [0x2A, 0xC6, 0x00, 0x04, 0x00, 0xB1];
//! let instructions = decode_stream(&code)?;
//!
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].mnemonic, "ifnull");
//! assert_eq!(instructions[1].operand, Operand::Target(5));
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::collections::HashSet;

use crate::{
    assembly::{
        instruction::{Instruction, Operand, OperandType},
        instructions::lookup,
        opcodes,
    },
    file::parser::Parser,
    Error, Result,
};

/// Decodes a complete code array.
///
/// The parser position is used as the instruction offset, which is why the whole array is
/// decoded from its first byte: switch padding is measured from the start of the code.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidOpcode`] for reserved opcodes, [`crate::Error::OutOfBounds`]
/// for truncated instructions and [`crate::Error::Malformed`] if a branch target does not start
/// an instruction.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    if code.is_empty() {
        return Err(Error::Empty);
    }

    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    let boundaries: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    for instruction in &instructions {
        for target in &instruction.branch_targets {
            if !boundaries.contains(target) {
                return Err(malformed_error!(
                    "Branch at {} targets {}, which is not an instruction boundary",
                    instruction.offset,
                    target
                ));
            }
        }
    }

    Ok(instructions)
}

/// Decodes a single instruction at the current parser position.
///
/// # Errors
///
/// Returns an error for reserved opcodes, invalid `wide` usage, malformed switch tables and
/// truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let offset =
        u32::try_from(start).map_err(|_| malformed_error!("Code offset {} too large", start))?;

    let first = parser.read_be::<u8>()?;
    let (opcode, wide) = if first == opcodes::WIDE {
        (parser.read_be::<u8>()?, true)
    } else {
        (first, false)
    };

    let metadata = lookup(opcode).ok_or(Error::InvalidOpcode { opcode, offset })?;
    if wide && !matches!(metadata.op_type, OperandType::Local | OperandType::Increment) {
        return Err(malformed_error!(
            "wide cannot modify {} at {}",
            metadata.instr,
            offset
        ));
    }

    let operand = match metadata.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Byte(parser.read_be()?),
        OperandType::Int16 => Operand::Short(parser.read_be()?),
        OperandType::Local if wide => Operand::Local(parser.read_be()?),
        OperandType::Local => Operand::Local(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant8 => Operand::Constant(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant16 => Operand::Constant(parser.read_be()?),
        OperandType::Increment if wide => Operand::Increment {
            index: parser.read_be()?,
            delta: parser.read_be()?,
        },
        OperandType::Increment => Operand::Increment {
            index: u16::from(parser.read_be::<u8>()?),
            delta: i16::from(parser.read_be::<i8>()?),
        },
        OperandType::Branch16 => {
            Operand::Target(branch_target(offset, i32::from(parser.read_be::<i16>()?))?)
        }
        OperandType::Branch32 => Operand::Target(branch_target(offset, parser.read_be()?)?),
        OperandType::InvokeInterface => {
            let index = parser.read_be::<u16>()?;
            let count = parser.read_be::<u8>()?;
            if parser.read_be::<u8>()? != 0 {
                return Err(malformed_error!(
                    "invokeinterface at {} has a non-zero fourth operand byte",
                    offset
                ));
            }
            Operand::InvokeInterface { index, count }
        }
        OperandType::InvokeDynamic => {
            let index = parser.read_be::<u16>()?;
            if parser.read_be::<u16>()? != 0 {
                return Err(malformed_error!(
                    "invokedynamic at {} has non-zero reserved bytes",
                    offset
                ));
            }
            Operand::Constant(index)
        }
        OperandType::ArrayType => Operand::ArrayType(parser.read_be()?),
        OperandType::MultiANewArray => Operand::MultiArray {
            index: parser.read_be()?,
            dimensions: parser.read_be()?,
        },
        OperandType::TableSwitch => {
            parser.align(4)?;
            let default = branch_target(offset, parser.read_be()?)?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if low > high {
                return Err(malformed_error!(
                    "tableswitch at {} has low {} > high {}",
                    offset,
                    low,
                    high
                ));
            }

            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            parser.calc_end_position(count.saturating_mul(4))?;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch_target(offset, parser.read_be()?)?);
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        OperandType::LookupSwitch => {
            parser.align(4)?;
            let default = branch_target(offset, parser.read_be()?)?;
            let npairs = parser.read_be::<i32>()?;
            let count = usize::try_from(npairs).map_err(|_| {
                malformed_error!("lookupswitch at {} has negative npairs {}", offset, npairs)
            })?;

            parser.calc_end_position(count.saturating_mul(8))?;
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let key = parser.read_be::<i32>()?;
                pairs.push((key, branch_target(offset, parser.read_be()?)?));
            }
            Operand::LookupSwitch { default, pairs }
        }
        OperandType::Wide => {
            return Err(malformed_error!("Nested wide prefix at {}", offset));
        }
    };

    let branch_targets = match &operand {
        Operand::Target(target) => vec![*target],
        Operand::TableSwitch {
            default, targets, ..
        } => targets.iter().copied().chain([*default]).collect(),
        Operand::LookupSwitch { default, pairs } => pairs
            .iter()
            .map(|(_, target)| *target)
            .chain([*default])
            .collect(),
        _ => Vec::new(),
    };

    Ok(Instruction {
        offset,
        size: (parser.pos() - start) as u32,
        opcode,
        wide,
        mnemonic: metadata.instr,
        flow_type: metadata.flow,
        operand,
        stack_behavior: metadata.stack,
        branch_targets,
    })
}

fn branch_target(offset: u32, relative: i32) -> Result<u32> {
    let target = i64::from(offset) + i64::from(relative);
    u32::try_from(target).map_err(|_| {
        malformed_error!(
            "Branch at {} with offset {} leaves the code array",
            offset,
            relative
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{FlowType, StackBehavior};

    #[test]
    fn decode_simple_sequence() {
        // aload_0; invokespecial #1; return
        let code = [0x2A, 0xB7, 0x00, 0x01, 0xB1];
        let instructions = decode_stream(&code).unwrap();

        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].mnemonic, "aload_0");
        assert_eq!(instructions[1].operand, Operand::Constant(1));
        assert_eq!(instructions[1].stack_behavior, StackBehavior::Dynamic);
        assert_eq!(instructions[1].offset, 1);
        assert_eq!(instructions[1].size, 3);
        assert!(instructions[2].is_return());
        assert_eq!(instructions[2].offset, 4);
    }

    #[test]
    fn decode_wide_forms() {
        // wide iinc 256 -300; wide aload 300; return
        let code = [
            0xC4, 0x84, 0x01, 0x00, 0xFE, 0xD4, 0xC4, 0x19, 0x01, 0x2C, 0xB1,
        ];
        let instructions = decode_stream(&code).unwrap();

        assert!(instructions[0].wide);
        assert_eq!(instructions[0].size, 6);
        assert_eq!(
            instructions[0].operand,
            Operand::Increment {
                index: 256,
                delta: -300
            }
        );
        assert_eq!(instructions[1].operand, Operand::Local(300));
        assert_eq!(instructions[2].offset, 10);
    }

    #[test]
    fn decode_tableswitch_padding() {
        #[rustfmt::skip]
        let code = [
            0x03,                   // 0: iconst_0
            0xAA, 0x00, 0x00,       // 1: tableswitch, padding to 4
            0x00, 0x00, 0x00, 0x17, // default -> 24
            0x00, 0x00, 0x00, 0x00, // low 0
            0x00, 0x00, 0x00, 0x01, // high 1
            0x00, 0x00, 0x00, 0x17, // 0 -> 24
            0x00, 0x00, 0x00, 0x18, // 1 -> 25
            0xB1,                   // 24: return
            0xB1,                   // 25: return
        ];
        let instructions = decode_stream(&code).unwrap();

        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[1].flow_type, FlowType::Switch);
        assert_eq!(instructions[1].size, 23);
        assert_eq!(instructions[1].branch_targets, [24, 25, 24]);
        assert_eq!(instructions[2].offset, 24);
    }

    #[test]
    fn decode_lookupswitch() {
        #[rustfmt::skip]
        let code = [
            0xAB, 0x00, 0x00, 0x00, // 0: lookupswitch, padding
            0x00, 0x00, 0x00, 0x14, // default -> 20
            0x00, 0x00, 0x00, 0x01, // npairs 1
            0xFF, 0xFF, 0xFF, 0xFF, // key -1
            0x00, 0x00, 0x00, 0x15, // -> 21
            0xB1,                   // 20
            0xB1,                   // 21
        ];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(
            instructions[0].operand,
            Operand::LookupSwitch {
                default: 20,
                pairs: vec![(-1, 21)]
            }
        );
    }

    #[test]
    fn backward_branch() {
        // 0: nop; 1: goto -1
        let instructions = decode_stream(&[0x00, 0xA7, 0xFF, 0xFF]).unwrap();
        assert_eq!(instructions[1].operand, Operand::Target(0));
        assert!(instructions[1].is_terminal());
    }

    #[test]
    fn reject_invalid_streams() {
        assert!(matches!(
            decode_stream(&[0xCA]),
            Err(Error::InvalidOpcode { opcode: 0xCA, offset: 0 })
        ));
        assert!(matches!(
            decode_stream(&[0xB7, 0x00]),
            Err(Error::OutOfBounds { .. })
        ));
        // goto into the middle of itself
        assert!(decode_stream(&[0xA7, 0x00, 0x01]).is_err());
        // goto before the code start
        assert!(decode_stream(&[0xA7, 0xFF, 0x00]).is_err());
        // wide nop
        assert!(decode_stream(&[0xC4, 0x00]).is_err());
        assert!(matches!(decode_stream(&[]), Err(Error::Empty)));
    }
}
