//! Operand stack and local variable bookkeeping for rewritten code.
//!
//! After instructions are inserted into a method, its `max_stack` and `max_locals` must be
//! recomputed. [`compute_max_stack`] walks every reachable path through the decoded code,
//! propagating the stack depth along fallthrough edges, branch and switch targets, subroutine
//! calls and exception handlers. The JVM requires the depth at a join point to be the same on
//! every incoming path; a mismatch is reported as [`crate::Error::InconsistentStack`].
//!
//! Instructions whose effect depends on the constant pool (field access, invocations) or on an
//! operand (`multianewarray`) are resolved through [`stack_effect`].

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{FlowType, Instruction, Operand, StackBehavior},
        opcodes,
    },
    classfile::{field_slot_size, CodeAttribute, ConstantPool, ExceptionHandler, MethodDescriptor},
    Error, Result,
};

/// Stack slots popped and pushed by `instruction`.
///
/// # Errors
///
/// Returns an error if a referenced constant pool entry is missing or of the wrong kind.
pub fn stack_effect(instruction: &Instruction, pool: &ConstantPool) -> Result<(u16, u16)> {
    if let StackBehavior::Fixed { pops, pushes } = instruction.stack_behavior {
        return Ok((u16::from(pops), u16::from(pushes)));
    }

    let index = || {
        instruction.constant_index().ok_or_else(|| {
            malformed_error!(
                "{} at {} has no constant operand",
                instruction.mnemonic,
                instruction.offset
            )
        })
    };

    match instruction.opcode {
        opcodes::GETSTATIC | opcodes::PUTSTATIC | opcodes::GETFIELD | opcodes::PUTFIELD => {
            let member = pool.member_ref(index()?)?;
            let size = field_slot_size(&member.descriptor);
            Ok(match instruction.opcode {
                opcodes::GETSTATIC => (0, size),
                opcodes::PUTSTATIC => (size, 0),
                opcodes::GETFIELD => (1, size),
                _ => (1 + size, 0),
            })
        }
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let member = pool.member_ref(index()?)?;
            let descriptor = MethodDescriptor::parse(&member.descriptor)?;
            let receiver = u16::from(instruction.opcode != opcodes::INVOKESTATIC);
            Ok((
                descriptor.argument_slots() + receiver,
                descriptor.return_slots(),
            ))
        }
        opcodes::INVOKEDYNAMIC => {
            let descriptor = MethodDescriptor::parse(&pool.invoke_dynamic_descriptor(index()?)?)?;
            Ok((descriptor.argument_slots(), descriptor.return_slots()))
        }
        opcodes::MULTIANEWARRAY => match instruction.operand {
            Operand::MultiArray { dimensions, .. } => Ok((u16::from(dimensions), 1)),
            _ => Err(malformed_error!(
                "multianewarray at {} without dimensions",
                instruction.offset
            )),
        },
        opcode => Err(malformed_error!(
            "No dynamic stack effect for opcode {:#04x}",
            opcode
        )),
    }
}

/// Computes the maximum operand stack depth over all reachable paths.
///
/// Exception handlers are entered with exactly the caught exception on the stack. A `jsr`
/// pushes its return address for the subroutine; the instruction after the `jsr` is assumed to
/// be reached again with the depth the call started with.
///
/// # Errors
///
/// Returns [`crate::Error::StackUnderflow`] if an instruction pops more than is available,
/// [`crate::Error::InconsistentStack`] if paths disagree on the depth at a join point and
/// [`crate::Error::Malformed`] if execution can run past the last instruction.
pub fn compute_max_stack(
    instructions: &[Instruction],
    handlers: &[ExceptionHandler],
    pool: &ConstantPool,
) -> Result<u16> {
    if instructions.is_empty() {
        return Ok(0);
    }

    let positions: HashMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(position, instruction)| (instruction.offset, position))
        .collect();
    let position_of = |offset: u32| {
        positions
            .get(&offset)
            .copied()
            .ok_or_else(|| malformed_error!("Offset {} is not an instruction boundary", offset))
    };

    let mut depths: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut worklist: Vec<usize> = Vec::new();
    let mut max_stack = 0_u16;

    let enter = |depths: &mut Vec<Option<u16>>,
                     worklist: &mut Vec<usize>,
                     position: usize,
                     depth: u16|
     -> Result<()> {
        match depths[position] {
            None => {
                depths[position] = Some(depth);
                worklist.push(position);
                Ok(())
            }
            Some(expected) if expected == depth => Ok(()),
            Some(expected) => Err(Error::InconsistentStack {
                offset: instructions[position].offset,
                expected: expected.into(),
                found: depth.into(),
            }),
        }
    };

    enter(&mut depths, &mut worklist, 0, 0)?;
    for handler in handlers {
        enter(
            &mut depths,
            &mut worklist,
            position_of(u32::from(handler.handler_pc))?,
            1,
        )?;
    }
    max_stack = max_stack.max(u16::from(!handlers.is_empty()));

    while let Some(position) = worklist.pop() {
        let instruction = &instructions[position];
        let depth = depths[position].unwrap_or_default();

        let (pops, pushes) = stack_effect(instruction, pool)?;
        let after_pop = depth.checked_sub(pops).ok_or(Error::StackUnderflow {
            offset: instruction.offset,
        })?;
        let after = after_pop
            .checked_add(pushes)
            .ok_or_else(|| malformed_error!("Stack depth overflow at {}", instruction.offset))?;
        max_stack = max_stack.max(after);

        let fallthrough = |depth: u16| -> Result<(usize, u16)> {
            if position + 1 >= instructions.len() {
                return Err(malformed_error!(
                    "Execution falls off the end of the code after {}",
                    instruction.offset
                ));
            }
            Ok((position + 1, depth))
        };

        let mut successors = Vec::new();
        match instruction.flow_type {
            FlowType::Sequential => successors.push(fallthrough(after)?),
            FlowType::ConditionalBranch => {
                for target in &instruction.branch_targets {
                    successors.push((position_of(*target)?, after));
                }
                successors.push(fallthrough(after)?);
            }
            FlowType::UnconditionalBranch | FlowType::Switch => {
                for target in &instruction.branch_targets {
                    successors.push((position_of(*target)?, after));
                }
            }
            FlowType::Subroutine => {
                for target in &instruction.branch_targets {
                    successors.push((position_of(*target)?, after));
                }
                successors.push(fallthrough(depth)?);
            }
            FlowType::Return | FlowType::Throw | FlowType::SubroutineReturn => {}
        }

        for (successor, successor_depth) in successors {
            enter(&mut depths, &mut worklist, successor, successor_depth)?;
        }
    }

    Ok(max_stack)
}

/// Computes the number of local variable slots the code needs.
///
/// The result covers the receiver (unless `is_static`), the parameters and every slot accessed
/// by a load, store, `iinc` or `ret`.
#[must_use]
pub fn compute_max_locals(
    instructions: &[Instruction],
    descriptor: &MethodDescriptor,
    is_static: bool,
) -> u16 {
    let parameters = descriptor.argument_slots() + u16::from(!is_static);
    instructions
        .iter()
        .filter_map(Instruction::local_access)
        .map(|(index, width)| index.saturating_add(width))
        .fold(parameters, u16::max)
}

/// Recomputes `max_stack` and raises `max_locals` of `code` in place.
///
/// `max_locals` is never lowered so locals declared but unused by the code stay valid.
///
/// # Errors
///
/// Returns an error if the code cannot be decoded or analysed.
pub fn update_limits(
    code: &mut CodeAttribute,
    pool: &ConstantPool,
    descriptor: &MethodDescriptor,
    is_static: bool,
) -> Result<()> {
    let instructions = crate::assembly::decode_stream(&code.code)?;
    code.max_stack = compute_max_stack(&instructions, &code.exception_table, pool)?;
    code.max_locals = code
        .max_locals
        .max(compute_max_locals(&instructions, descriptor, is_static));
    Ok(())
}
