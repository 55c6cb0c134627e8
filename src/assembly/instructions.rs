//! Static opcode metadata table.
//!
//! [`INSTRUCTIONS`] is indexed by opcode byte and drives both the decoder and the encoder, so
//! the two can never disagree about an operand layout. Stack effects are given in slots;
//! entries marked [`StackBehavior::Dynamic`] are resolved through the constant pool by
//! [`crate::assembly::stack`].

use crate::assembly::instruction::{FlowType, OperandType, StackBehavior};

/// Metadata for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct JvmInstruction {
    /// Mnemonic
    pub instr: &'static str,
    /// Operand encoding
    pub op_type: OperandType,
    /// Control flow classification
    pub flow: FlowType,
    /// Operand stack effect
    pub stack: StackBehavior,
}

const fn op(
    instr: &'static str,
    op_type: OperandType,
    flow: FlowType,
    pops: u8,
    pushes: u8,
) -> JvmInstruction {
    JvmInstruction {
        instr,
        op_type,
        flow,
        stack: StackBehavior::Fixed { pops, pushes },
    }
}

const fn seq(instr: &'static str, pops: u8, pushes: u8) -> JvmInstruction {
    op(instr, OperandType::None, FlowType::Sequential, pops, pushes)
}

const fn dynamic(instr: &'static str, op_type: OperandType) -> JvmInstruction {
    JvmInstruction {
        instr,
        op_type,
        flow: FlowType::Sequential,
        stack: StackBehavior::Dynamic,
    }
}

const fn local(instr: &'static str, pops: u8, pushes: u8) -> JvmInstruction {
    op(instr, OperandType::Local, FlowType::Sequential, pops, pushes)
}

const fn branch(instr: &'static str, pops: u8) -> JvmInstruction {
    op(instr, OperandType::Branch16, FlowType::ConditionalBranch, pops, 0)
}

const fn ret(instr: &'static str, pops: u8) -> JvmInstruction {
    op(instr, OperandType::None, FlowType::Return, pops, 0)
}

/// Looks up the metadata of `opcode`; `None` for reserved opcodes.
#[must_use]
pub fn lookup(opcode: u8) -> Option<&'static JvmInstruction> {
    INSTRUCTIONS.get(usize::from(opcode))
}

/// Metadata for opcodes `0x00..=0xC9`, indexed by opcode.
pub static INSTRUCTIONS: [JvmInstruction; 202] = [
    // 0x00
    seq("nop", 0, 0),
    seq("aconst_null", 0, 1),
    seq("iconst_m1", 0, 1),
    seq("iconst_0", 0, 1),
    seq("iconst_1", 0, 1),
    seq("iconst_2", 0, 1),
    seq("iconst_3", 0, 1),
    seq("iconst_4", 0, 1),
    seq("iconst_5", 0, 1),
    seq("lconst_0", 0, 2),
    seq("lconst_1", 0, 2),
    seq("fconst_0", 0, 1),
    seq("fconst_1", 0, 1),
    seq("fconst_2", 0, 1),
    seq("dconst_0", 0, 2),
    seq("dconst_1", 0, 2),
    // 0x10
    op("bipush", OperandType::Int8, FlowType::Sequential, 0, 1),
    op("sipush", OperandType::Int16, FlowType::Sequential, 0, 1),
    op("ldc", OperandType::Constant8, FlowType::Sequential, 0, 1),
    op("ldc_w", OperandType::Constant16, FlowType::Sequential, 0, 1),
    op("ldc2_w", OperandType::Constant16, FlowType::Sequential, 0, 2),
    local("iload", 0, 1),
    local("lload", 0, 2),
    local("fload", 0, 1),
    local("dload", 0, 2),
    local("aload", 0, 1),
    seq("iload_0", 0, 1),
    seq("iload_1", 0, 1),
    seq("iload_2", 0, 1),
    seq("iload_3", 0, 1),
    seq("lload_0", 0, 2),
    seq("lload_1", 0, 2),
    // 0x20
    seq("lload_2", 0, 2),
    seq("lload_3", 0, 2),
    seq("fload_0", 0, 1),
    seq("fload_1", 0, 1),
    seq("fload_2", 0, 1),
    seq("fload_3", 0, 1),
    seq("dload_0", 0, 2),
    seq("dload_1", 0, 2),
    seq("dload_2", 0, 2),
    seq("dload_3", 0, 2),
    seq("aload_0", 0, 1),
    seq("aload_1", 0, 1),
    seq("aload_2", 0, 1),
    seq("aload_3", 0, 1),
    seq("iaload", 2, 1),
    seq("laload", 2, 2),
    // 0x30
    seq("faload", 2, 1),
    seq("daload", 2, 2),
    seq("aaload", 2, 1),
    seq("baload", 2, 1),
    seq("caload", 2, 1),
    seq("saload", 2, 1),
    local("istore", 1, 0),
    local("lstore", 2, 0),
    local("fstore", 1, 0),
    local("dstore", 2, 0),
    local("astore", 1, 0),
    seq("istore_0", 1, 0),
    seq("istore_1", 1, 0),
    seq("istore_2", 1, 0),
    seq("istore_3", 1, 0),
    seq("lstore_0", 2, 0),
    // 0x40
    seq("lstore_1", 2, 0),
    seq("lstore_2", 2, 0),
    seq("lstore_3", 2, 0),
    seq("fstore_0", 1, 0),
    seq("fstore_1", 1, 0),
    seq("fstore_2", 1, 0),
    seq("fstore_3", 1, 0),
    seq("dstore_0", 2, 0),
    seq("dstore_1", 2, 0),
    seq("dstore_2", 2, 0),
    seq("dstore_3", 2, 0),
    seq("astore_0", 1, 0),
    seq("astore_1", 1, 0),
    seq("astore_2", 1, 0),
    seq("astore_3", 1, 0),
    seq("iastore", 3, 0),
    // 0x50
    seq("lastore", 4, 0),
    seq("fastore", 3, 0),
    seq("dastore", 4, 0),
    seq("aastore", 3, 0),
    seq("bastore", 3, 0),
    seq("castore", 3, 0),
    seq("sastore", 3, 0),
    seq("pop", 1, 0),
    seq("pop2", 2, 0),
    seq("dup", 1, 2),
    seq("dup_x1", 2, 3),
    seq("dup_x2", 3, 4),
    seq("dup2", 2, 4),
    seq("dup2_x1", 3, 5),
    seq("dup2_x2", 4, 6),
    seq("swap", 2, 2),
    // 0x60
    seq("iadd", 2, 1),
    seq("ladd", 4, 2),
    seq("fadd", 2, 1),
    seq("dadd", 4, 2),
    seq("isub", 2, 1),
    seq("lsub", 4, 2),
    seq("fsub", 2, 1),
    seq("dsub", 4, 2),
    seq("imul", 2, 1),
    seq("lmul", 4, 2),
    seq("fmul", 2, 1),
    seq("dmul", 4, 2),
    seq("idiv", 2, 1),
    seq("ldiv", 4, 2),
    seq("fdiv", 2, 1),
    seq("ddiv", 4, 2),
    // 0x70
    seq("irem", 2, 1),
    seq("lrem", 4, 2),
    seq("frem", 2, 1),
    seq("drem", 4, 2),
    seq("ineg", 1, 1),
    seq("lneg", 2, 2),
    seq("fneg", 1, 1),
    seq("dneg", 2, 2),
    seq("ishl", 2, 1),
    seq("lshl", 3, 2),
    seq("ishr", 2, 1),
    seq("lshr", 3, 2),
    seq("iushr", 2, 1),
    seq("lushr", 3, 2),
    seq("iand", 2, 1),
    seq("land", 4, 2),
    // 0x80
    seq("ior", 2, 1),
    seq("lor", 4, 2),
    seq("ixor", 2, 1),
    seq("lxor", 4, 2),
    op("iinc", OperandType::Increment, FlowType::Sequential, 0, 0),
    seq("i2l", 1, 2),
    seq("i2f", 1, 1),
    seq("i2d", 1, 2),
    seq("l2i", 2, 1),
    seq("l2f", 2, 1),
    seq("l2d", 2, 2),
    seq("f2i", 1, 1),
    seq("f2l", 1, 2),
    seq("f2d", 1, 2),
    seq("d2i", 2, 1),
    seq("d2l", 2, 2),
    // 0x90
    seq("d2f", 2, 1),
    seq("i2b", 1, 1),
    seq("i2c", 1, 1),
    seq("i2s", 1, 1),
    seq("lcmp", 4, 1),
    seq("fcmpl", 2, 1),
    seq("fcmpg", 2, 1),
    seq("dcmpl", 4, 1),
    seq("dcmpg", 4, 1),
    branch("ifeq", 1),
    branch("ifne", 1),
    branch("iflt", 1),
    branch("ifge", 1),
    branch("ifgt", 1),
    branch("ifle", 1),
    branch("if_icmpeq", 2),
    // 0xA0
    branch("if_icmpne", 2),
    branch("if_icmplt", 2),
    branch("if_icmpge", 2),
    branch("if_icmpgt", 2),
    branch("if_icmple", 2),
    branch("if_acmpeq", 2),
    branch("if_acmpne", 2),
    op("goto", OperandType::Branch16, FlowType::UnconditionalBranch, 0, 0),
    op("jsr", OperandType::Branch16, FlowType::Subroutine, 0, 1),
    op("ret", OperandType::Local, FlowType::SubroutineReturn, 0, 0),
    op("tableswitch", OperandType::TableSwitch, FlowType::Switch, 1, 0),
    op("lookupswitch", OperandType::LookupSwitch, FlowType::Switch, 1, 0),
    ret("ireturn", 1),
    ret("lreturn", 2),
    ret("freturn", 1),
    ret("dreturn", 2),
    // 0xB0
    ret("areturn", 1),
    ret("return", 0),
    dynamic("getstatic", OperandType::Constant16),
    dynamic("putstatic", OperandType::Constant16),
    dynamic("getfield", OperandType::Constant16),
    dynamic("putfield", OperandType::Constant16),
    dynamic("invokevirtual", OperandType::Constant16),
    dynamic("invokespecial", OperandType::Constant16),
    dynamic("invokestatic", OperandType::Constant16),
    dynamic("invokeinterface", OperandType::InvokeInterface),
    dynamic("invokedynamic", OperandType::InvokeDynamic),
    op("new", OperandType::Constant16, FlowType::Sequential, 0, 1),
    op("newarray", OperandType::ArrayType, FlowType::Sequential, 1, 1),
    op("anewarray", OperandType::Constant16, FlowType::Sequential, 1, 1),
    seq("arraylength", 1, 1),
    op("athrow", OperandType::None, FlowType::Throw, 1, 0),
    // 0xC0
    op("checkcast", OperandType::Constant16, FlowType::Sequential, 1, 1),
    op("instanceof", OperandType::Constant16, FlowType::Sequential, 1, 1),
    seq("monitorenter", 1, 0),
    seq("monitorexit", 1, 0),
    op("wide", OperandType::Wide, FlowType::Sequential, 0, 0),
    dynamic("multianewarray", OperandType::MultiANewArray),
    branch("ifnull", 1),
    branch("ifnonnull", 1),
    op("goto_w", OperandType::Branch32, FlowType::UnconditionalBranch, 0, 0),
    op("jsr_w", OperandType::Branch32, FlowType::Subroutine, 0, 1),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes;

    #[test]
    fn table_matches_opcode_constants() {
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::NOP)].instr, "nop");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::LLOAD_1)].instr, "lload_1");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::SASTORE)].instr, "sastore");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::SWAP)].instr, "swap");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::IINC)].instr, "iinc");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::IF_ICMPEQ)].instr, "if_icmpeq");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::RETURN)].instr, "return");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::INVOKESTATIC)].instr, "invokestatic");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::WIDE)].instr, "wide");
        assert_eq!(INSTRUCTIONS[usize::from(opcodes::JSR_W)].instr, "jsr_w");
    }

    #[test]
    fn reserved_opcodes_are_absent() {
        assert!(lookup(0xCA).is_none());
        assert!(lookup(0xFE).is_none());
        assert!(lookup(0xFF).is_none());
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for instruction in &INSTRUCTIONS {
            assert!(seen.insert(instruction.instr), "{}", instruction.instr);
        }
    }
}
