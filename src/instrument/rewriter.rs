//! Splicing tracking blocks into a method body.
//!
//! [`MethodRewriter`] re-emits a method's instructions through an [`InstructionEncoder`],
//! defining a label at every original instruction offset and inserting the injector's block at
//! the requested [`InstrumentationPoint`]. Branches are re-emitted against those labels, so
//! relative offsets and switch padding are recomputed from the new layout, and the final label
//! positions form the offset map applied to everything else in the `Code` attribute:
//!
//! - exception table ranges and handlers
//! - `LineNumberTable` and `LocalVariable(Type)Table` entries
//! - `StackMapTable` frames, including `Uninitialized` types
//!
//! A label for a return instruction is defined in front of the block inserted before it, so
//! anything that referred to the return now refers to the block. For entry instrumentation the
//! block comes before the first label, which keeps loops back to offset 0 from re-running it.
//!
//! The rewritten body keeps the original `max_stack`/`max_locals`; recomputing them is a
//! separate pass, see [`crate::assembly::update_limits`].

use log::warn;

use crate::{
    assembly::{decode_stream, InstructionEncoder},
    classfile::{code::names, CodeAttr, CodeAttribute, ConstantPool, LocalVariable},
    instrument::injector::{EventKind, Injector},
    Result,
};

/// Where a block is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentationPoint {
    /// Immediately before every return instruction
    BeforeReturn,
    /// Once, before the first original instruction
    MethodEntry,
}

/// Result of rewriting one method body.
#[derive(Debug, Clone)]
pub struct RewrittenCode {
    /// The new body; limits are those of the original
    pub code: CodeAttribute,
    /// Number of inserted blocks
    pub blocks: usize,
    /// Names of nested attributes that were dropped
    pub dropped: Vec<String>,
}

/// Rewrites method bodies using one [`Injector`].
#[derive(Debug, Clone, Copy)]
pub struct MethodRewriter<'a> {
    injector: &'a Injector,
}

impl<'a> MethodRewriter<'a> {
    /// Creates a rewriter around `injector`.
    #[must_use]
    pub fn new(injector: &'a Injector) -> Self {
        MethodRewriter { injector }
    }

    /// Inserts the `kind` block at `point` in `code`.
    ///
    /// Constants referenced by the block are interned in `pool`, which must be the pool the
    /// method belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the code cannot be decoded, a branch no longer fits its 16-bit
    /// offset, the new body exceeds 65535 bytes, or a table refers to an offset that does not
    /// start an instruction.
    pub fn rewrite(
        &self,
        code: &CodeAttribute,
        point: InstrumentationPoint,
        kind: EventKind,
        pool: &mut ConstantPool,
    ) -> Result<RewrittenCode> {
        let instructions = decode_stream(&code.code)?;
        let block = self.injector.build_block(kind);
        let mut encoder = InstructionEncoder::new();
        let mut blocks = 0;

        if point == InstrumentationPoint::MethodEntry {
            self.injector.emit(&block, pool, &mut encoder)?;
            blocks += 1;
        }

        for instruction in &instructions {
            encoder.define_label(&label(instruction.offset))?;
            if point == InstrumentationPoint::BeforeReturn && instruction.is_return() {
                self.injector.emit(&block, pool, &mut encoder)?;
                blocks += 1;
            }
            encoder.emit_instruction_decoded(instruction, label)?;
        }

        let code_end = u32::try_from(code.code.len())
            .map_err(|_| malformed_error!("Code length {} too large", code.code.len()))?;
        encoder.define_label(&label(code_end))?;

        let (bytecode, labels) = encoder.finalize()?;
        if bytecode.len() > usize::from(u16::MAX) {
            return Err(malformed_error!(
                "Instrumented code is {} bytes, the limit is 65535",
                bytecode.len()
            ));
        }

        let map = |offset: u32| -> Result<u32> {
            labels.get(&label(offset)).copied().ok_or_else(|| {
                malformed_error!("Offset {} does not start an instruction", offset)
            })
        };
        let map16 = |offset: u16| -> Result<u16> {
            // Bounded by the length check above
            Ok(map(u32::from(offset))? as u16)
        };

        let mut exception_table = code.exception_table.clone();
        for handler in &mut exception_table {
            handler.start_pc = map16(handler.start_pc)?;
            handler.end_pc = map16(handler.end_pc)?;
            handler.handler_pc = map16(handler.handler_pc)?;
        }

        let mut attributes = Vec::with_capacity(code.attributes.len());
        let mut dropped = Vec::new();
        for attribute in &code.attributes {
            match attribute {
                CodeAttr::LineNumbers { name_index, entries } => {
                    let mut entries = entries.clone();
                    for entry in &mut entries {
                        entry.start_pc = map16(entry.start_pc)?;
                    }
                    attributes.push(CodeAttr::LineNumbers {
                        name_index: *name_index,
                        entries,
                    });
                }
                CodeAttr::LocalVariables { name_index, entries } => {
                    let entries = entries
                        .iter()
                        .map(|entry| {
                            let start = map16(entry.start_pc)?;
                            let end = map(u32::from(entry.start_pc) + u32::from(entry.length))?;
                            Ok(LocalVariable {
                                start_pc: start,
                                length: (end - u32::from(start)) as u16,
                                ..*entry
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    attributes.push(CodeAttr::LocalVariables {
                        name_index: *name_index,
                        entries,
                    });
                }
                CodeAttr::StackMap { name_index, frames } => {
                    let mut frames = frames.clone();
                    for frame in &mut frames {
                        frame.remap(&map)?;
                    }
                    attributes.push(CodeAttr::StackMap {
                        name_index: *name_index,
                        frames,
                    });
                }
                CodeAttr::Other(raw) => {
                    let name = pool.utf8(raw.name_index)?;
                    if name == names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS
                        || name == names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS
                    {
                        warn!("Dropping {name}, its code offsets cannot be remapped");
                        dropped.push(name.into_owned());
                    } else {
                        attributes.push(attribute.clone());
                    }
                }
            }
        }

        Ok(RewrittenCode {
            code: CodeAttribute {
                max_stack: code.max_stack,
                max_locals: code.max_locals,
                code: bytecode,
                exception_table,
                attributes,
            },
            blocks,
            dropped,
        })
    }
}

fn label(offset: u32) -> String {
    format!("L{offset}")
}
