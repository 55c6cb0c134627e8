mod common;

use std::borrow::Cow;

use common::{branchy_class, resource_class, Jvm, Value, GET_STACK_TRACE_FRAME};
use leakscope::{
    assembly::{decode_stream, opcodes, Instruction},
    classfile::{
        builder::{ClassBuilder, MethodBuilder},
        MethodAccessFlags,
    },
    AgentConfig, ClassFile, ClassFileTransformer, ClassTransformer, Error, Registry,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn transformer_for(target: &str) -> ClassTransformer {
    ClassTransformer::new(AgentConfig::new().with_target(target))
}

fn method_names(class: &ClassFile) -> Vec<(String, String)> {
    class
        .methods()
        .iter()
        .map(|method| {
            (
                method.name(&class.constant_pool).unwrap().into_owned(),
                method.descriptor(&class.constant_pool).unwrap().into_owned(),
            )
        })
        .collect()
}

fn instructions_of(class: &ClassFile, name: &str, descriptor: &str) -> Vec<Instruction> {
    let method = class.method(name, descriptor).unwrap().unwrap();
    let code = method.code(&class.constant_pool).unwrap().unwrap();
    decode_stream(&code.code).unwrap()
}

/// Counts `ldc` loads of `text`.
fn string_loads(class: &ClassFile, instructions: &[Instruction], text: &str) -> usize {
    instructions
        .iter()
        .filter(|instruction| {
            matches!(instruction.opcode, opcodes::LDC | opcodes::LDC_W)
                && matches!(
                    class.constant_pool.get(instruction.constant_index().unwrap()),
                    Ok(leakscope::classfile::Constant::String { string_index })
                        if class.constant_pool.utf8(*string_index).unwrap() == text
                )
        })
        .count()
}

#[test]
fn non_target_classes_pass_through() {
    let transformer = transformer_for("stub/Resource");
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..64 {
        let len = rng.random_range(0..256);
        let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();

        let first = transformer.transform("other/Thing", &bytes).unwrap();
        let second = transformer.transform("other/Thing", &bytes).unwrap();
        assert!(matches!(first, Cow::Borrowed(_)));
        assert_eq!(first.as_ref(), bytes.as_slice());
        assert_eq!(first, second);
    }

    let valid = resource_class();
    assert_eq!(
        transformer.transform_class("stub/Resources", &valid).unwrap(),
        None
    );
    assert_eq!(
        transformer.transform("stub.Resourc", &valid).unwrap().as_ref(),
        valid.as_slice()
    );
}

#[test]
fn output_reparses_with_same_methods() {
    let bytes = resource_class();
    let output = transformer_for("stub/Resource")
        .transform("stub/Resource", &bytes)
        .unwrap()
        .into_owned();

    let before = ClassFile::parse(&bytes).unwrap();
    let after = ClassFile::parse(&output).unwrap();
    assert_eq!(method_names(&before), method_names(&after));
    assert_eq!(before.fields.len(), after.fields.len());
    assert_eq!(after.name().unwrap(), "stub/Resource");

    // Serializing the parsed output again is lossless
    assert_eq!(after.to_bytes().unwrap(), output);
}

#[test]
fn dotted_names_match_the_target() {
    let bytes = resource_class();
    let transformer = ClassTransformer::new(AgentConfig::new().with_target("stub.Resource"));
    assert!(matches!(
        transformer.transform("stub.Resource", &bytes).unwrap(),
        Cow::Owned(_)
    ));
    assert!(transformer
        .transform_class("stub/Resource", &bytes)
        .unwrap()
        .is_some());
}

#[test]
fn every_constructor_return_gets_one_block() {
    let bytes = branchy_class();
    let config = AgentConfig::new().with_target("stub/Branchy");
    let label = config.created_label();
    let output = ClassTransformer::new(config)
        .transform("stub/Branchy", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();

    let original = instructions_of(&ClassFile::parse(&bytes).unwrap(), "<init>", "(I)V");
    let rewritten = instructions_of(&class, "<init>", "(I)V");
    let returns = original.iter().filter(|i| i.is_return()).count();
    assert_eq!(returns, 3);
    assert_eq!(rewritten.iter().filter(|i| i.is_return()).count(), returns);
    assert_eq!(string_loads(&class, &rewritten, &label), returns);

    // Each block ends right before its return
    for (position, instruction) in rewritten.iter().enumerate() {
        if instruction.is_return() {
            let previous = &rewritten[position - 1];
            assert_eq!(previous.opcode, opcodes::INVOKEVIRTUAL);
            let member = class
                .constant_pool
                .member_ref(previous.constant_index().unwrap())
                .unwrap();
            assert_eq!(member.name, "println");
        }
    }
}

#[test]
fn every_exit_path_records_exactly_once() {
    let bytes = branchy_class();
    let config = AgentConfig::new().with_target("stub/Branchy");
    let output = ClassTransformer::new(config.clone())
        .transform("stub/Branchy", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();

    for argument in [0, 7, -3] {
        let registry = Registry::new();
        let mut jvm = Jvm::new(&registry, &config.tracker);
        let object = jvm.construct(&class, "(I)V", vec![Value::Int(argument)], "Main.main(Main.java:9)");

        assert_eq!(registry.len(), 1, "argument {argument}");
        assert!(registry.contains(object.0));
        assert_eq!(jvm.strings[&config.created_label()], 1);
        assert_eq!(
            jvm.output[0],
            format!("{}{}", config.created_label(), object.0)
        );
    }
}

#[test]
fn switch_targets_are_remapped() {
    let bytes = ClassBuilder::new("stub/Switch")
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "(I)V").code(|asm| {
                asm.op("aload_0")?
                    .invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                asm.op("iload_1")?
                    .tableswitch(0, "other", &["zero", "one"])?;
                asm.label("zero")?.op("return")?;
                asm.label("one")?.op("return")?;
                asm.label("other")?.op("return")?;
                Ok(())
            }),
        )
        .build()
        .unwrap();

    let config = AgentConfig::new().with_target("stub/Switch");
    let output = ClassTransformer::new(config.clone())
        .transform("stub/Switch", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();

    let instructions = instructions_of(&class, "<init>", "(I)V");
    let switch = instructions
        .iter()
        .find(|i| i.opcode == opcodes::TABLESWITCH)
        .unwrap();
    for target in switch.get_targets() {
        let destination = instructions.iter().find(|i| i.offset == *target).unwrap();
        // Targets land on the start of a block, not on the bare return
        assert_eq!(destination.opcode, opcodes::GETSTATIC);
    }

    for argument in [0, 1, 2] {
        let registry = Registry::new();
        let mut jvm = Jvm::new(&registry, &config.tracker);
        jvm.construct(&class, "(I)V", vec![Value::Int(argument)], "Main.main(Main.java:2)");
        assert_eq!(registry.len(), 1);
    }
}

#[test]
fn exception_ranges_follow_their_code() {
    let bytes = ClassBuilder::new("stub/Guarded")
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "()V").code(|asm| {
                asm.op("aload_0")?
                    .invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                asm.label("start")?.op("aload_0")?.op("pop")?;
                asm.label("end")?.op("return")?;
                asm.label("handler")?.op("athrow")?;
                asm.try_catch("start", "end", "handler", None);
                Ok(())
            }),
        )
        .build()
        .unwrap();

    let output = transformer_for("stub/Guarded")
        .transform("stub/Guarded", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();
    let method = class.method("<init>", "()V").unwrap().unwrap();
    let code = method.code(&class.constant_pool).unwrap().unwrap();
    let instructions = decode_stream(&code.code).unwrap();
    let at = |offset: u16| {
        instructions
            .iter()
            .find(|i| i.offset == u32::from(offset))
            .map(|i| i.mnemonic)
            .unwrap()
    };

    let handler = &code.exception_table[0];
    assert_eq!(at(handler.start_pc), "aload_0");
    assert_eq!(at(handler.handler_pc), "athrow");
    // The range still ends where the block for the return begins
    assert_eq!(at(handler.end_pc), "getstatic");
}

#[test]
fn creation_and_disposal_print_and_track() {
    let bytes = resource_class();
    let config = AgentConfig::new().with_target("stub/Resource");
    let output = ClassTransformer::new(config.clone())
        .transform("stub/Resource", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();

    let registry = Registry::new();
    let mut jvm = Jvm::new(&registry, &config.tracker);
    let object = jvm.construct(&class, "()V", Vec::new(), "Main.main(Main.java:5)");

    assert_eq!(
        jvm.output,
        [
            format!("[Agent] Resource object created: {}", object.0),
            format!(
                "[{GET_STACK_TRACE_FRAME}, stub.Resource.<init>(Resource.java), Main.main(Main.java:5)]"
            ),
        ]
    );
    let record = registry.get(object.0).unwrap();
    assert_eq!(
        record.context.frames(),
        ["stub.Resource.<init>(Resource.java)", "Main.main(Main.java:5)"]
    );

    jvm.call(&class, object, "release", "()V", "Main.main(Main.java:6)");
    assert!(registry.is_empty());
    assert_eq!(
        jvm.output[2],
        format!("[Agent] Resource object released: {}", object.0)
    );

    // Releasing twice is harmless
    jvm.call(&class, object, "release", "()V", "Main.main(Main.java:7)");
    assert!(registry.is_empty());
    assert_eq!(jvm.output.len(), 6);
}

#[test]
fn tracker_tokens_are_used_when_configured() {
    let bytes = resource_class();
    let config = AgentConfig::parse_options("target=stub.Resource,token=tracker,tracker=app.Leaks")
        .unwrap();
    let output = ClassTransformer::new(config.clone())
        .transform("stub/Resource", &bytes)
        .unwrap()
        .into_owned();
    let class = ClassFile::parse(&output).unwrap();

    let owners: Vec<String> = instructions_of(&class, "<init>", "()V")
        .iter()
        .filter(|i| i.opcode == opcodes::INVOKESTATIC)
        .map(|i| {
            let member = class
                .constant_pool
                .member_ref(i.constant_index().unwrap())
                .unwrap();
            format!("{}.{}", member.owner, member.name)
        })
        .collect();
    assert!(owners.contains(&"app/Leaks.token".to_string()));
    assert!(owners.contains(&"app/Leaks.add".to_string()));
    assert!(!owners.iter().any(|o| o.ends_with("identityHashCode")));

    let registry = Registry::new();
    let mut jvm = Jvm::new(&registry, "app/Leaks");
    let object = jvm.construct(&class, "()V", Vec::new(), "Main.main(Main.java:1)");
    assert!(registry.contains(object.0));
}

#[test]
fn limits_cover_the_injected_block() {
    let bytes = resource_class();
    let mut class = ClassFile::parse(&bytes).unwrap();
    let summary = transformer_for("stub/Resource").instrument(&mut class).unwrap();

    assert_eq!(summary.methods.len(), 2);
    for method in &summary.methods {
        assert!(method.max_stack >= 3, "{}", method.name);
        assert_eq!(method.max_locals, 1, "{}", method.name);
    }
}

#[test]
fn broken_target_fails_loudly() {
    let transformer = transformer_for("stub/Resource");
    let mut bytes = resource_class();
    bytes.truncate(bytes.len() / 2);
    assert!(transformer.transform("stub/Resource", &bytes).is_err());

    let mut mislabeled = resource_class();
    mislabeled[0] = 0;
    assert!(matches!(
        transformer.transform("stub/Resource", &mislabeled),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn far_branches_are_rejected_not_corrupted() {
    // goto over a return to the end of a body close to the 16-bit branch limit
    let bytes = ClassBuilder::new("stub/Huge")
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "()V").code(|asm| {
                asm.op("aload_0")?
                    .invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                asm.branch("goto", "far")?.op("return")?;
                for _ in 0..32_740 {
                    asm.op("nop")?;
                }
                asm.label("far")?.op("return")?;
                Ok(())
            }),
        )
        .build()
        .unwrap();

    let result = transformer_for("stub/Huge").transform("stub/Huge", &bytes);
    assert!(matches!(result, Err(Error::BranchOutOfRange { .. })));
}
