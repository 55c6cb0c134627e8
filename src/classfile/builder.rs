//! Builders for synthesizing class files.
//!
//! [`ClassBuilder`] assembles a complete, loadable class file from [`MethodBuilder`]s. Method
//! bodies are written through a closure that receives a [`MethodAssembler`], which wraps the
//! [`crate::assembly::InstructionEncoder`] together with the class's constant pool so field and
//! method references can be written by name. `max_stack` and `max_locals` are computed from the
//! finished code.
//!
//! The builders are used for fixtures and tests throughout the crate, and by tools that need a
//! small class file without a Java compiler at hand.
//!
//! # Examples
//!
//! ```rust
//! use leakscope::classfile::{
//!     builder::{ClassBuilder, MethodBuilder},
//!     ClassFile, MethodAccessFlags,
//! };
//!
//! let bytes = ClassBuilder::new("demo/Counter")
//!     .method(MethodBuilder::constructor("java/lang/Object"))
//!     .method(
//!         MethodBuilder::new(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC, "twice", "(I)I")
//!             .code(|asm| {
//!                 asm.load("iload", 0)?.op("dup")?.op("iadd")?.op("ireturn")?;
//!                 Ok(())
//!             }),
//!     )
//!     .build()?;
//!
//! let class = ClassFile::parse(&bytes)?;
//! let method = class.method("twice", "(I)I")?.unwrap();
//! let code = method.code(&class.constant_pool)?.unwrap();
//! assert_eq!((code.max_stack, code.max_locals), (2, 1));
//! # Ok::<(), leakscope::Error>(())
//! ```

use crate::{
    assembly::{compute_max_locals, compute_max_stack, decode_stream, InstructionEncoder, Operand},
    classfile::{
        code::names, stackmap::FrameKind, Attribute, ClassAccessFlags, ClassFile, CodeAttr,
        CodeAttribute, ConstantPool, ExceptionHandler, FieldAccessFlags, FieldInfo, LineNumber,
        MethodAccessFlags, MethodDescriptor, MethodInfo, StackMapFrame,
    },
    Error, Result,
};

/// Type alias for method body closures
type CodeFn = Box<dyn FnOnce(&mut MethodAssembler<'_>) -> Result<()>>;

/// Label based assembler handed to [`MethodBuilder::code`] closures.
pub struct MethodAssembler<'a> {
    encoder: InstructionEncoder,
    pool: &'a mut ConstantPool,
    handlers: Vec<(String, String, String, Option<String>)>,
    lines: Vec<(u32, u16)>,
    frames: Vec<(String, FrameKind)>,
}

impl<'a> MethodAssembler<'a> {
    fn new(pool: &'a mut ConstantPool) -> Self {
        MethodAssembler {
            encoder: InstructionEncoder::new(),
            pool,
            handlers: Vec::new(),
            lines: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// The class constant pool, for entries the helpers do not cover.
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut *self.pool
    }

    /// Emits an instruction without operands.
    ///
    /// # Errors
    /// Returns an error if the mnemonic is unknown or requires an operand.
    pub fn op(&mut self, mnemonic: &str) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, None)?;
        Ok(self)
    }

    /// Emits an instruction with an explicit operand.
    ///
    /// # Errors
    /// Returns an error if the operand does not match the instruction.
    pub fn op_with(&mut self, mnemonic: &str, operand: Operand) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, Some(operand))?;
        Ok(self)
    }

    /// Emits a load or store with an explicit local slot, e.g. `load("aload", 1)`.
    ///
    /// # Errors
    /// Returns an error if the mnemonic does not take a local slot.
    pub fn load(&mut self, mnemonic: &str, index: u16) -> Result<&mut Self> {
        self.op_with(mnemonic, Operand::Local(index))
    }

    /// Emits an `int` constant in its most compact form.
    ///
    /// # Errors
    /// Returns an error if the value needs a constant pool entry.
    pub fn iconst(&mut self, value: i32) -> Result<&mut Self> {
        self.encoder.emit_iconst(value)?;
        Ok(self)
    }

    /// Emits `ldc` of a string constant.
    ///
    /// # Errors
    /// Returns an error if the constant pool is full.
    pub fn ldc_string(&mut self, text: &str) -> Result<&mut Self> {
        let index = self.pool.string_index(text)?;
        self.encoder.emit_ldc(index)?;
        Ok(self)
    }

    /// Emits a field access (`getstatic`, `putstatic`, `getfield`, `putfield`).
    ///
    /// # Errors
    /// Returns an error if the mnemonic is not a field access or the pool is full.
    pub fn field(
        &mut self,
        mnemonic: &str,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self> {
        let index = self.pool.field_ref_index(owner, name, descriptor)?;
        self.op_with(mnemonic, Operand::Constant(index))
    }

    /// Emits `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`.
    ///
    /// # Errors
    /// Returns an error if the mnemonic is not an invocation or the descriptor is invalid.
    pub fn invoke(
        &mut self,
        mnemonic: &str,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self> {
        if mnemonic == "invokeinterface" {
            let index = self.pool.method_ref_index(owner, name, descriptor, true)?;
            let slots = MethodDescriptor::parse(descriptor)?.argument_slots() + 1;
            let count = u8::try_from(slots)
                .map_err(|_| malformed_error!("Too many arguments - {}", descriptor))?;
            return self.op_with("invokeinterface", Operand::InvokeInterface { index, count });
        }

        let index = self.pool.method_ref_index(owner, name, descriptor, false)?;
        self.op_with(mnemonic, Operand::Constant(index))
    }

    /// Emits an instruction taking a `Class` operand (`new`, `checkcast`, `instanceof`,
    /// `anewarray`).
    ///
    /// # Errors
    /// Returns an error if the mnemonic takes a different operand.
    pub fn class_op(&mut self, mnemonic: &str, class: &str) -> Result<&mut Self> {
        let index = self.pool.class_index(class)?;
        self.op_with(mnemonic, Operand::Constant(index))
    }

    /// Emits a branch to `label`.
    ///
    /// # Errors
    /// Returns an error if the mnemonic is not a branch.
    pub fn branch(&mut self, mnemonic: &str, label: &str) -> Result<&mut Self> {
        self.encoder.emit_branch(mnemonic, label)?;
        Ok(self)
    }

    /// Emits a `tableswitch` over `low..`.
    ///
    /// # Errors
    /// Returns an error if the table is empty.
    pub fn tableswitch(&mut self, low: i32, default: &str, labels: &[&str]) -> Result<&mut Self> {
        let count = i32::try_from(labels.len())
            .map_err(|_| Error::InvalidBranch("Too many tableswitch targets".to_string()))?;
        let high = low.saturating_add(count.saturating_sub(1));
        self.encoder.emit_tableswitch(low, high, default, labels)?;
        Ok(self)
    }

    /// Emits a `lookupswitch`.
    ///
    /// # Errors
    /// Returns an error if the keys are not strictly increasing.
    pub fn lookupswitch(&mut self, default: &str, pairs: &[(i32, &str)]) -> Result<&mut Self> {
        self.encoder.emit_lookupswitch(default, pairs)?;
        Ok(self)
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    /// Returns an error if the label already exists.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        self.encoder.define_label(name)?;
        Ok(self)
    }

    /// Records a line number for the next instruction.
    pub fn line(&mut self, line_number: u16) -> &mut Self {
        self.lines
            .push((self.encoder.current_position(), line_number));
        self
    }

    /// Adds an exception handler covering `start..end`; `catch_type` of `None` catches
    /// everything.
    pub fn try_catch(
        &mut self,
        start: &str,
        end: &str,
        handler: &str,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.handlers.push((
            start.to_string(),
            end.to_string(),
            handler.to_string(),
            catch_type.map(str::to_string),
        ));
        self
    }

    /// Records a stack map frame at `label`.
    pub fn frame(&mut self, label: &str, kind: FrameKind) -> &mut Self {
        self.frames.push((label.to_string(), kind));
        self
    }

    fn finish(
        self,
        descriptor: &MethodDescriptor,
        is_static: bool,
    ) -> Result<CodeAttribute> {
        let MethodAssembler {
            encoder,
            pool,
            handlers,
            lines,
            frames,
        } = self;
        let (code, labels) = encoder.finalize()?;

        let position = |label: &str| -> Result<u16> {
            let offset = labels
                .get(label)
                .copied()
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))?;
            u16::try_from(offset).map_err(|_| malformed_error!("Label {} exceeds 65535", label))
        };

        let mut exception_table = Vec::with_capacity(handlers.len());
        for (start, end, handler, catch_type) in &handlers {
            exception_table.push(ExceptionHandler {
                start_pc: position(start)?,
                end_pc: position(end)?,
                handler_pc: position(handler)?,
                catch_type: match catch_type {
                    Some(class) => pool.class_index(class)?,
                    None => 0,
                },
            });
        }

        let mut attributes = Vec::new();
        if !lines.is_empty() {
            let mut entries = Vec::with_capacity(lines.len());
            for (offset, line_number) in lines {
                entries.push(LineNumber {
                    start_pc: u16::try_from(offset)
                        .map_err(|_| malformed_error!("Line offset exceeds 65535"))?,
                    line_number,
                });
            }
            attributes.push(CodeAttr::LineNumbers {
                name_index: pool.utf8_index(names::LINE_NUMBER_TABLE)?,
                entries,
            });
        }
        if !frames.is_empty() {
            let mut resolved = Vec::with_capacity(frames.len());
            for (label, kind) in frames {
                resolved.push(StackMapFrame {
                    offset: u32::from(position(&label)?),
                    kind,
                });
            }
            resolved.sort_by_key(|frame| frame.offset);
            attributes.push(CodeAttr::StackMap {
                name_index: pool.utf8_index(names::STACK_MAP_TABLE)?,
                frames: resolved,
            });
        }

        let instructions = decode_stream(&code)?;
        Ok(CodeAttribute {
            max_stack: compute_max_stack(&instructions, &exception_table, pool)?,
            max_locals: compute_max_locals(&instructions, descriptor, is_static),
            code,
            exception_table,
            attributes,
        })
    }
}

/// Builder for a single method.
pub struct MethodBuilder {
    access_flags: MethodAccessFlags,
    name: String,
    descriptor: String,
    body: Option<CodeFn>,
}

impl MethodBuilder {
    /// Creates a method without a body; add one with [`MethodBuilder::code`].
    #[must_use]
    pub fn new(access_flags: MethodAccessFlags, name: &str, descriptor: &str) -> Self {
        MethodBuilder {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            body: None,
        }
    }

    /// A public no-argument constructor that only calls the superclass constructor.
    #[must_use]
    pub fn constructor(super_class: &str) -> Self {
        let super_class = super_class.to_string();
        MethodBuilder::new(MethodAccessFlags::PUBLIC, "<init>", "()V").code(move |asm| {
            asm.op("aload_0")?
                .invoke("invokespecial", &super_class, "<init>", "()V")?
                .op("return")?;
            Ok(())
        })
    }

    /// A public method with an empty `()V` body.
    #[must_use]
    pub fn empty(name: &str) -> Self {
        MethodBuilder::new(MethodAccessFlags::PUBLIC, name, "()V").code(|asm| {
            asm.op("return")?;
            Ok(())
        })
    }

    /// Sets the method body.
    #[must_use]
    pub fn code<F>(mut self, body: F) -> Self
    where
        F: FnOnce(&mut MethodAssembler<'_>) -> Result<()> + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    fn build(self, pool: &mut ConstantPool) -> Result<MethodInfo> {
        let descriptor = MethodDescriptor::parse(&self.descriptor)?;
        let mut method = MethodInfo {
            access_flags: self.access_flags,
            name_index: pool.utf8_index(&self.name)?,
            descriptor_index: pool.utf8_index(&self.descriptor)?,
            attributes: Vec::new(),
        };

        if let Some(body) = self.body {
            let is_static = self.access_flags.contains(MethodAccessFlags::STATIC);
            let mut asm = MethodAssembler::new(pool);
            body(&mut asm)?;
            let code = asm.finish(&descriptor, is_static)?;
            method.set_code(pool, &code)?;
        }

        Ok(method)
    }
}

/// Builder for a complete class file.
pub struct ClassBuilder {
    name: String,
    super_class: String,
    access_flags: ClassAccessFlags,
    major_version: u16,
    fields: Vec<(FieldAccessFlags, String, String)>,
    methods: Vec<MethodBuilder>,
    source_file: Option<String>,
}

impl ClassBuilder {
    /// Starts a public class extending `java/lang/Object`, class file version 52 (Java 8).
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.replace('.', "/"),
            super_class: "java/lang/Object".to_string(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            major_version: 52,
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Sets the superclass.
    #[must_use]
    pub fn super_class(mut self, name: &str) -> Self {
        self.super_class = name.replace('.', "/");
        self
    }

    /// Sets the access flags.
    #[must_use]
    pub fn access(mut self, access_flags: ClassAccessFlags) -> Self {
        self.access_flags = access_flags;
        self
    }

    /// Sets the major version.
    #[must_use]
    pub fn version(mut self, major_version: u16) -> Self {
        self.major_version = major_version;
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((access_flags, name.to_string(), descriptor.to_string()));
        self
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a `SourceFile` attribute.
    #[must_use]
    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.to_string());
        self
    }

    /// Builds the parsed model.
    ///
    /// # Errors
    /// Returns an error if a method body fails to assemble.
    pub fn build_class(self) -> Result<ClassFile> {
        let mut pool = ConstantPool::new();
        let this_class = pool.class_index(&self.name)?;
        let super_class = pool.class_index(&self.super_class)?;

        let mut fields = Vec::with_capacity(self.fields.len());
        for (access_flags, name, descriptor) in &self.fields {
            fields.push(FieldInfo {
                access_flags: *access_flags,
                name_index: pool.utf8_index(name)?,
                descriptor_index: pool.utf8_index(descriptor)?,
                attributes: Vec::new(),
            });
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for method in self.methods {
            methods.push(method.build(&mut pool)?);
        }

        let mut attributes = Vec::new();
        if let Some(source_file) = &self.source_file {
            let name_index = pool.utf8_index("SourceFile")?;
            let value = pool.utf8_index(source_file)?;
            attributes.push(Attribute {
                name_index,
                data: value.to_be_bytes().to_vec(),
            });
        }

        Ok(ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields,
            methods,
            attributes,
        })
    }

    /// Builds the serialized class file.
    ///
    /// # Errors
    /// Returns an error if a method body fails to assemble.
    pub fn build(self) -> Result<Vec<u8>> {
        self.build_class()?.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::VerificationType;

    #[test]
    fn constructor_body() {
        let class = ClassBuilder::new("a.b.C")
            .method(MethodBuilder::constructor("java/lang/Object"))
            .build_class()
            .unwrap();

        assert_eq!(class.name().unwrap(), "a/b/C");
        let code = class.methods()[0]
            .code(&class.constant_pool)
            .unwrap()
            .unwrap();
        assert_eq!(code.code[0], 0x2A);
        assert_eq!(code.code[1], 0xB7);
        assert_eq!(code.code[4], 0xB1);
        assert_eq!((code.max_stack, code.max_locals), (1, 1));
    }

    #[test]
    fn handlers_lines_and_frames() {
        let bytes = ClassBuilder::new("test/Guarded")
            .method(
                MethodBuilder::new(MethodAccessFlags::PUBLIC, "run", "()V").code(|asm| {
                    asm.line(10).label("start")?.op("aload_0")?.op("pop")?;
                    asm.label("end")?.op("return")?;
                    asm.line(11).label("handler")?.op("athrow")?;
                    let throwable = asm.pool().class_index("java/lang/Throwable")?;
                    asm.try_catch("start", "end", "handler", Some("java/lang/Throwable"))
                        .frame(
                            "handler",
                            FrameKind::SameLocals1StackItem(VerificationType::Object(throwable)),
                        );
                    Ok(())
                }),
            )
            .build()
            .unwrap();

        let class = ClassFile::parse(&bytes).unwrap();
        let code = class.methods()[0]
            .code(&class.constant_pool)
            .unwrap()
            .unwrap();

        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].handler_pc, 3);
        assert_eq!(code.stack_map().unwrap()[0].offset, 3);
        assert_eq!(code.max_stack, 1);
        assert!(matches!(
            &code.attributes[0],
            CodeAttr::LineNumbers { entries, .. } if entries.len() == 2 && entries[1].start_pc == 3
        ));
    }

    #[test]
    fn undefined_label_fails() {
        let result = ClassBuilder::new("test/Broken")
            .method(MethodBuilder::empty("run").code(|asm| {
                asm.branch("goto", "nowhere")?;
                Ok(())
            }))
            .build();
        assert!(matches!(result, Err(Error::UndefinedLabel(_))));
    }

    #[test]
    fn bodiless_and_fields() {
        let class = ClassBuilder::new("test/Shape")
            .access(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .field(FieldAccessFlags::PRIVATE, "handle", "J")
            .method(MethodBuilder::new(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
                "area",
                "()D",
            ))
            .source_file("Shape.java")
            .build_class()
            .unwrap();

        assert_eq!(class.fields.len(), 1);
        assert!(class.methods()[0]
            .code(&class.constant_pool)
            .unwrap()
            .is_none());
        assert_eq!(class.attributes.len(), 1);
    }
}
