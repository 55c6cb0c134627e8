//! The tracking block injected into lifecycle methods.
//!
//! A block is first built symbolically as a list of [`BlockInstruction`]s, which is pure and
//! depends only on the [`EventKind`] and the configuration. Lowering it with
//! [`Injector::emit`] interns the referenced members in the class's constant pool and writes
//! the concrete instructions through an [`InstructionEncoder`].
//!
//! The block keeps the identity token on the operand stack instead of storing it in a local,
//! so it never needs a free local variable slot and leaves the stack exactly as it found it:
//!
//! ```text
//! getstatic     java/lang/System.out
//! ldc           "<label>"
//! invokevirtual java/io/PrintStream.print(Ljava/lang/String;)V
//! aload_0
//! invokestatic  java/lang/System.identityHashCode(Ljava/lang/Object;)I
//! dup
//! getstatic     java/lang/System.out
//! swap
//! invokevirtual java/io/PrintStream.println(I)V
//! [creation: stack trace string, then tracker.add(ILjava/lang/String;)V]
//! [disposal: tracker.remove(I)V]
//! getstatic     java/lang/System.out
//! <stack trace string>
//! invokevirtual java/io/PrintStream.println(Ljava/lang/String;)V
//! ```

use std::fmt;

use crate::{
    assembly::{InstructionEncoder, Operand},
    classfile::{ConstantPool, MemberRef},
    config::{AgentConfig, TokenSource},
    Result,
};

const SYSTEM: &str = "java/lang/System";
const PRINT_STREAM: &str = "java/io/PrintStream";
const PRINT_STREAM_TYPE: &str = "Ljava/io/PrintStream;";

/// Which lifecycle event a block records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The object was constructed
    Creation,
    /// The object's disposal method was called
    Disposal,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Creation => write!(f, "creation"),
            EventKind::Disposal => write!(f, "disposal"),
        }
    }
}

/// One symbolic instruction of a tracking block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockInstruction {
    /// `getstatic`
    GetStatic(MemberRef),
    /// `ldc`/`ldc_w` of a string constant
    LoadString(String),
    /// `aload_0`
    LoadThis,
    /// `invokestatic`
    InvokeStatic(MemberRef),
    /// `invokevirtual`
    InvokeVirtual(MemberRef),
    /// `dup`
    Dup,
    /// `swap`
    Swap,
}

impl fmt::Display for BlockInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockInstruction::GetStatic(member) => write!(f, "getstatic {member}"),
            BlockInstruction::LoadString(text) => write!(f, "ldc {text:?}"),
            BlockInstruction::LoadThis => write!(f, "aload_0"),
            BlockInstruction::InvokeStatic(member) => write!(f, "invokestatic {member}"),
            BlockInstruction::InvokeVirtual(member) => write!(f, "invokevirtual {member}"),
            BlockInstruction::Dup => write!(f, "dup"),
            BlockInstruction::Swap => write!(f, "swap"),
        }
    }
}

/// Builds and lowers tracking blocks for one configuration.
#[derive(Debug, Clone)]
pub struct Injector {
    tracker: String,
    token: TokenSource,
    created_label: String,
    released_label: String,
}

impl Injector {
    /// Creates an injector from the agent configuration.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Injector {
            tracker: config.tracker.clone(),
            token: config.token,
            created_label: config.created_label(),
            released_label: config.released_label(),
        }
    }

    /// Builds the symbolic block for `kind`.
    #[must_use]
    pub fn build_block(&self, kind: EventKind) -> Vec<BlockInstruction> {
        let label = match kind {
            EventKind::Creation => &self.created_label,
            EventKind::Disposal => &self.released_label,
        };

        let mut block = vec![
            BlockInstruction::GetStatic(system_out()),
            BlockInstruction::LoadString(label.clone()),
            BlockInstruction::InvokeVirtual(MemberRef::new(
                PRINT_STREAM,
                "print",
                "(Ljava/lang/String;)V",
            )),
            BlockInstruction::LoadThis,
            BlockInstruction::InvokeStatic(self.token_source()),
            BlockInstruction::Dup,
            BlockInstruction::GetStatic(system_out()),
            BlockInstruction::Swap,
            BlockInstruction::InvokeVirtual(MemberRef::new(PRINT_STREAM, "println", "(I)V")),
        ];

        match kind {
            EventKind::Creation => {
                block.extend(stack_trace_string());
                block.push(BlockInstruction::InvokeStatic(MemberRef::new(
                    &self.tracker,
                    "add",
                    "(ILjava/lang/String;)V",
                )));
            }
            EventKind::Disposal => {
                block.push(BlockInstruction::InvokeStatic(MemberRef::new(
                    &self.tracker,
                    "remove",
                    "(I)V",
                )));
            }
        }

        block.push(BlockInstruction::GetStatic(system_out()));
        block.extend(stack_trace_string());
        block.push(BlockInstruction::InvokeVirtual(MemberRef::new(
            PRINT_STREAM,
            "println",
            "(Ljava/lang/String;)V",
        )));

        block
    }

    /// Lowers `block` into `encoder`, interning its constants in `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool cannot take the new entries.
    pub fn emit(
        &self,
        block: &[BlockInstruction],
        pool: &mut ConstantPool,
        encoder: &mut InstructionEncoder,
    ) -> Result<()> {
        for instruction in block {
            match instruction {
                BlockInstruction::GetStatic(member) => {
                    let index = pool.field_ref_index(&member.owner, &member.name, &member.descriptor)?;
                    encoder.emit_instruction("getstatic", Some(Operand::Constant(index)))?;
                }
                BlockInstruction::LoadString(text) => {
                    let index = pool.string_index(text)?;
                    encoder.emit_ldc(index)?;
                }
                BlockInstruction::LoadThis => encoder.emit_instruction("aload_0", None)?,
                BlockInstruction::InvokeStatic(member) => {
                    let index = pool.method_ref_index(
                        &member.owner,
                        &member.name,
                        &member.descriptor,
                        false,
                    )?;
                    encoder.emit_instruction("invokestatic", Some(Operand::Constant(index)))?;
                }
                BlockInstruction::InvokeVirtual(member) => {
                    let index = pool.method_ref_index(
                        &member.owner,
                        &member.name,
                        &member.descriptor,
                        false,
                    )?;
                    encoder.emit_instruction("invokevirtual", Some(Operand::Constant(index)))?;
                }
                BlockInstruction::Dup => encoder.emit_instruction("dup", None)?,
                BlockInstruction::Swap => encoder.emit_instruction("swap", None)?,
            }
        }
        Ok(())
    }

    fn token_source(&self) -> MemberRef {
        match self.token {
            TokenSource::Identity => {
                MemberRef::new(SYSTEM, "identityHashCode", "(Ljava/lang/Object;)I")
            }
            TokenSource::Tracker => MemberRef::new(&self.tracker, "token", "(Ljava/lang/Object;)I"),
        }
    }
}

fn system_out() -> MemberRef {
    MemberRef::new(SYSTEM, "out", PRINT_STREAM_TYPE)
}

/// `Arrays.toString(Thread.currentThread().getStackTrace())`
fn stack_trace_string() -> [BlockInstruction; 3] {
    [
        BlockInstruction::InvokeStatic(MemberRef::new(
            "java/lang/Thread",
            "currentThread",
            "()Ljava/lang/Thread;",
        )),
        BlockInstruction::InvokeVirtual(MemberRef::new(
            "java/lang/Thread",
            "getStackTrace",
            "()[Ljava/lang/StackTraceElement;",
        )),
        BlockInstruction::InvokeStatic(MemberRef::new(
            "java/util/Arrays",
            "toString",
            "([Ljava/lang/Object;)Ljava/lang/String;",
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{compute_max_stack, decode_stream, stack_effect};

    fn lowered(injector: &Injector, kind: EventKind) -> (Vec<u8>, ConstantPool) {
        let mut pool = ConstantPool::new();
        let mut encoder = InstructionEncoder::new();
        injector
            .emit(&injector.build_block(kind), &mut pool, &mut encoder)
            .unwrap();
        encoder.emit_instruction("return", None).unwrap();
        (encoder.finalize().unwrap().0, pool)
    }

    #[test]
    fn creation_block_calls_add() {
        let injector = Injector::new(&AgentConfig::default());
        let block = injector.build_block(EventKind::Creation);

        assert_eq!(block.len(), 18);
        assert_eq!(
            block[1],
            BlockInstruction::LoadString("[Agent] Mat object created: ".to_string())
        );
        assert_eq!(
            block[12],
            BlockInstruction::InvokeStatic(MemberRef::new(
                "leakscope/Tracker",
                "add",
                "(ILjava/lang/String;)V"
            ))
        );
    }

    #[test]
    fn disposal_block_calls_remove() {
        let config = AgentConfig::default().with_token(TokenSource::Tracker);
        let injector = Injector::new(&config);
        let block = injector.build_block(EventKind::Disposal);

        assert_eq!(block.len(), 15);
        assert_eq!(
            block[4],
            BlockInstruction::InvokeStatic(MemberRef::new(
                "leakscope/Tracker",
                "token",
                "(Ljava/lang/Object;)I"
            ))
        );
        assert!(block.contains(&BlockInstruction::InvokeStatic(MemberRef::new(
            "leakscope/Tracker",
            "remove",
            "(I)V"
        ))));
    }

    #[test]
    fn blocks_are_stack_neutral() {
        let injector = Injector::new(&AgentConfig::default());
        for kind in [EventKind::Creation, EventKind::Disposal] {
            let (code, pool) = lowered(&injector, kind);
            let instructions = decode_stream(&code).unwrap();

            let mut depth = 0_i32;
            for instruction in &instructions {
                let (pops, pushes) = stack_effect(instruction, &pool).unwrap();
                depth += i32::from(pushes) - i32::from(pops);
                assert!(depth >= 0);
            }
            assert_eq!(depth, 0, "{kind}");
            assert_eq!(compute_max_stack(&instructions, &[], &pool).unwrap(), 3);
            assert!(instructions.iter().all(|i| i.local_access() != Some((1, 1))));
        }
    }

    #[test]
    fn lowering_reuses_constants() {
        let injector = Injector::new(&AgentConfig::default());
        let mut pool = ConstantPool::new();
        let mut encoder = InstructionEncoder::new();
        let block = injector.build_block(EventKind::Creation);

        injector.emit(&block, &mut pool, &mut encoder).unwrap();
        let after_first = pool.len();
        injector.emit(&block, &mut pool, &mut encoder).unwrap();
        assert_eq!(pool.len(), after_first);
    }
}
