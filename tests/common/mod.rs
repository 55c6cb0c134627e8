//! A tiny interpreter for instrumented lifecycle methods.
//!
//! It understands exactly the instructions that synthesized fixtures and the injected tracking
//! blocks use, and models the handful of JDK calls those blocks make. Tracker calls go to a
//! real [`Registry`], console output is collected line by line.

#![allow(dead_code)]

use std::collections::HashMap;

use leakscope::{
    assembly::{decode_stream, Instruction, Operand},
    classfile::{
        builder::{ClassBuilder, MethodBuilder},
        Constant, MethodAccessFlags,
    },
    ClassFile, Registry,
};

/// Frame `Thread.getStackTrace` reports for itself.
pub const GET_STACK_TRACE_FRAME: &str = "java.lang.Thread.getStackTrace(Thread.java:1559)";

/// An object on the emulated heap; its identity hash is its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Object(pub i32);

/// An operand stack or local variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Ref(Object),
    Str(String),
    Out,
    Thread,
    Trace(Vec<String>),
}

impl Value {
    fn int(&self) -> i32 {
        match self {
            Value::Int(value) => *value,
            other => panic!("expected int, found {other:?}"),
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Int(value) => value.to_string(),
            Value::Long(value) => value.to_string(),
            Value::Str(text) => text.clone(),
            other => panic!("cannot print {other:?}"),
        }
    }
}

/// Executes lifecycle methods of one class.
pub struct Jvm<'r> {
    registry: &'r Registry,
    tracker: String,
    next_object: i32,
    pending: String,
    /// Completed console lines
    pub output: Vec<String>,
    /// Number of `ldc` instructions executed, per string
    pub strings: HashMap<String, usize>,
}

impl<'r> Jvm<'r> {
    pub fn new(registry: &'r Registry, tracker: &str) -> Self {
        Jvm {
            registry,
            tracker: tracker.to_string(),
            next_object: 0x1000,
            pending: String::new(),
            output: Vec::new(),
            strings: HashMap::new(),
        }
    }

    /// Allocates an object and runs `<init>` with the given descriptor and arguments.
    pub fn construct(
        &mut self,
        class: &ClassFile,
        descriptor: &str,
        args: Vec<Value>,
        caller: &str,
    ) -> Object {
        self.next_object += 1;
        let object = Object(self.next_object);
        let mut locals = vec![Value::Ref(object)];
        locals.extend(args);
        self.run(class, "<init>", descriptor, locals, caller);
        object
    }

    /// Runs an instance method on `object`.
    pub fn call(
        &mut self,
        class: &ClassFile,
        object: Object,
        name: &str,
        descriptor: &str,
        caller: &str,
    ) -> Option<Value> {
        self.run(class, name, descriptor, vec![Value::Ref(object)], caller)
    }

    fn run(
        &mut self,
        class: &ClassFile,
        name: &str,
        descriptor: &str,
        mut locals: Vec<Value>,
        caller: &str,
    ) -> Option<Value> {
        let pool = &class.constant_pool;
        let method = class
            .method(name, descriptor)
            .unwrap()
            .unwrap_or_else(|| panic!("no method {name}{descriptor}"));
        let code = method.code(pool).unwrap().expect("method has code");
        let instructions = decode_stream(&code.code).unwrap();
        let index_of: HashMap<u32, usize> = instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (instruction.offset, index))
            .collect();

        let class_name = class.name().unwrap().replace('/', ".");
        let simple = class_name.rsplit('.').next().unwrap_or_default().to_string();
        let trace = vec![
            GET_STACK_TRACE_FRAME.to_string(),
            format!("{class_name}.{name}({simple}.java)"),
            caller.to_string(),
        ];

        locals.resize(usize::from(code.max_locals).max(locals.len()), Value::Int(0));
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        let mut steps = 0;

        loop {
            steps += 1;
            assert!(steps < 100_000, "runaway execution in {name}");

            let instruction: &Instruction = &instructions[pc];
            assert!(
                stack.len() <= usize::from(code.max_stack),
                "max_stack {} exceeded at {}",
                code.max_stack,
                instruction.offset
            );
            let mut next = pc + 1;

            match instruction.mnemonic {
                "nop" => {}
                "aload_0" | "aload_1" | "aload_2" | "aload_3" | "iload_0" | "iload_1"
                | "iload_2" | "iload_3" | "aload" | "iload" => {
                    stack.push(locals[local_slot(instruction)].clone());
                }
                "astore_0" | "astore_1" | "astore_2" | "astore_3" | "istore_0" | "istore_1"
                | "istore_2" | "istore_3" | "astore" | "istore" => {
                    let value = stack.pop().unwrap();
                    locals[local_slot(instruction)] = value;
                }
                "iconst_m1" => stack.push(Value::Int(-1)),
                "iconst_0" | "iconst_1" | "iconst_2" | "iconst_3" | "iconst_4" | "iconst_5" => {
                    let value = instruction.mnemonic[7..].parse().unwrap();
                    stack.push(Value::Int(value));
                }
                "bipush" | "sipush" => match instruction.operand {
                    Operand::Byte(value) => stack.push(Value::Int(i32::from(value))),
                    Operand::Short(value) => stack.push(Value::Int(i32::from(value))),
                    ref other => panic!("bad push operand {other:?}"),
                },
                "lconst_0" => stack.push(Value::Long(0)),
                "lconst_1" => stack.push(Value::Long(1)),
                "ldc" | "ldc_w" => {
                    let index = instruction.constant_index().unwrap();
                    match pool.get(index).unwrap() {
                        Constant::String { string_index } => {
                            let text = pool.utf8(*string_index).unwrap().into_owned();
                            *self.strings.entry(text.clone()).or_default() += 1;
                            stack.push(Value::Str(text));
                        }
                        Constant::Integer(value) => stack.push(Value::Int(*value)),
                        other => panic!("unsupported ldc constant {other:?}"),
                    }
                }
                "dup" => {
                    let top = stack.last().unwrap().clone();
                    stack.push(top);
                }
                "pop" => {
                    stack.pop().unwrap();
                }
                "swap" => {
                    let len = stack.len();
                    stack.swap(len - 1, len - 2);
                }
                "iadd" => {
                    let right = stack.pop().unwrap().int();
                    let left = stack.pop().unwrap().int();
                    stack.push(Value::Int(left.wrapping_add(right)));
                }
                "iinc" => {
                    if let Operand::Increment { index, delta } = instruction.operand {
                        let slot = usize::from(index);
                        locals[slot] = Value::Int(locals[slot].int() + i32::from(delta));
                    }
                }
                "getstatic" => {
                    let member = pool.member_ref(instruction.constant_index().unwrap()).unwrap();
                    assert_eq!(
                        (member.owner.as_str(), member.name.as_str()),
                        ("java/lang/System", "out")
                    );
                    stack.push(Value::Out);
                }
                "putfield" => {
                    stack.pop().unwrap();
                    assert!(matches!(stack.pop(), Some(Value::Ref(_))));
                }
                "goto" | "goto_w" => next = self.target(instruction, &index_of),
                "ifeq" | "ifne" | "iflt" | "ifge" | "ifgt" | "ifle" => {
                    let value = stack.pop().unwrap().int();
                    let taken = match instruction.mnemonic {
                        "ifeq" => value == 0,
                        "ifne" => value != 0,
                        "iflt" => value < 0,
                        "ifge" => value >= 0,
                        "ifgt" => value > 0,
                        _ => value <= 0,
                    };
                    if taken {
                        next = self.target(instruction, &index_of);
                    }
                }
                "tableswitch" | "lookupswitch" => {
                    let key = stack.pop().unwrap().int();
                    let target = match &instruction.operand {
                        Operand::TableSwitch {
                            default,
                            low,
                            high,
                            targets,
                        } => {
                            if key < *low || key > *high {
                                *default
                            } else {
                                targets[(key - low) as usize]
                            }
                        }
                        Operand::LookupSwitch { default, pairs } => pairs
                            .iter()
                            .find(|(candidate, _)| *candidate == key)
                            .map_or(*default, |(_, target)| *target),
                        other => panic!("bad switch operand {other:?}"),
                    };
                    next = index_of[&target];
                }
                "invokespecial" => {
                    let member = pool.member_ref(instruction.constant_index().unwrap()).unwrap();
                    assert_eq!(member.name, "<init>", "only super constructors are modelled");
                    assert!(matches!(stack.pop(), Some(Value::Ref(_))));
                }
                "invokevirtual" => {
                    let member = pool.member_ref(instruction.constant_index().unwrap()).unwrap();
                    match (member.owner.as_str(), member.name.as_str()) {
                        ("java/io/PrintStream", "print" | "println") => {
                            let text = stack.pop().unwrap().render();
                            assert_eq!(stack.pop(), Some(Value::Out));
                            self.pending.push_str(&text);
                            if member.name == "println" {
                                self.output.push(std::mem::take(&mut self.pending));
                            }
                        }
                        ("java/lang/Thread", "getStackTrace") => {
                            assert_eq!(stack.pop(), Some(Value::Thread));
                            stack.push(Value::Trace(trace.clone()));
                        }
                        _ => panic!("unsupported call {member}"),
                    }
                }
                "invokestatic" => {
                    let member = pool.member_ref(instruction.constant_index().unwrap()).unwrap();
                    match (member.owner.as_str(), member.name.as_str()) {
                        ("java/lang/System", "identityHashCode") => {
                            let Some(Value::Ref(object)) = stack.pop() else {
                                panic!("identityHashCode needs an object");
                            };
                            stack.push(Value::Int(object.0));
                        }
                        ("java/lang/Thread", "currentThread") => stack.push(Value::Thread),
                        ("java/util/Arrays", "toString") => {
                            let Some(Value::Trace(frames)) = stack.pop() else {
                                panic!("Arrays.toString needs a stack trace");
                            };
                            stack.push(Value::Str(format!("[{}]", frames.join(", "))));
                        }
                        (owner, "token") if owner == self.tracker => {
                            let Some(Value::Ref(object)) = stack.pop() else {
                                panic!("token needs an object");
                            };
                            stack.push(Value::Int(object.0));
                        }
                        (owner, "add") if owner == self.tracker => {
                            let Some(Value::Str(context)) = stack.pop() else {
                                panic!("add needs a context string");
                            };
                            let token = stack.pop().unwrap().int();
                            self.registry.add_trace(token, &context);
                        }
                        (owner, "remove") if owner == self.tracker => {
                            let token = stack.pop().unwrap().int();
                            self.registry.remove(token);
                        }
                        _ => panic!("unsupported call {member}"),
                    }
                }
                "return" => {
                    assert!(stack.is_empty(), "stack not empty on return: {stack:?}");
                    return None;
                }
                "ireturn" | "areturn" | "lreturn" => {
                    let value = stack.pop().unwrap();
                    assert!(stack.is_empty(), "stack not empty on return: {stack:?}");
                    return Some(value);
                }
                other => panic!("unsupported instruction {other} at {}", instruction.offset),
            }

            pc = next;
        }
    }

    fn target(&self, instruction: &Instruction, index_of: &HashMap<u32, usize>) -> usize {
        match instruction.operand {
            Operand::Target(target) => index_of[&target],
            ref other => panic!("bad branch operand {other:?}"),
        }
    }
}

fn local_slot(instruction: &Instruction) -> usize {
    match instruction.operand {
        Operand::Local(index) => usize::from(index),
        _ => instruction.mnemonic[instruction.mnemonic.len() - 1..]
            .parse()
            .unwrap(),
    }
}

/// `stub/Resource` with a one-return constructor and a `release()V` method.
pub fn resource_class() -> Vec<u8> {
    ClassBuilder::new("stub/Resource")
        .method(MethodBuilder::constructor("java/lang/Object"))
        .method(MethodBuilder::empty("release"))
        .build()
        .unwrap()
}

/// `stub/Branchy` whose `<init>(I)V` returns from three places depending on its argument.
pub fn branchy_class() -> Vec<u8> {
    ClassBuilder::new("stub/Branchy")
        .method(
            MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "(I)V").code(|asm| {
                asm.op("aload_0")?
                    .invoke("invokespecial", "java/lang/Object", "<init>", "()V")?;
                asm.op("iload_1")?.branch("ifne", "nonzero")?.op("return")?;
                asm.label("nonzero")?
                    .op("iload_1")?
                    .branch("iflt", "negative")?
                    .op("return")?;
                asm.label("negative")?.op("return")?;
                Ok(())
            }),
        )
        .method(MethodBuilder::empty("release"))
        .build()
        .unwrap()
}
