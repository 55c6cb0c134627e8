//! Java class file model (JVMS §4).
//!
//! This module parses a `.class` file into a [`ClassFile`] that can be inspected, modified and
//! written back. The model is deliberately shallow: the constant pool and method bodies are
//! decoded because instrumentation needs them, while fields, class attributes and method
//! attributes other than `Code` are carried as raw bytes. Serializing an unmodified model
//! reproduces the input byte for byte.
//!
//! # Key Components
//!
//! - [`ClassFile`] - The parsed class with its member tables
//! - [`ConstantPool`] - Symbol table with lookup and interning helpers
//! - [`CodeAttribute`] - Parsed method body
//! - [`MethodDescriptor`] - Parameter and return slot accounting
//! - [`builder::ClassBuilder`] - Synthesizes class files from scratch
//!
//! # Examples
//!
//! ```rust
//! use leakscope::classfile::{builder::{ClassBuilder, MethodBuilder}, ClassFile};
//!
//! let bytes = ClassBuilder::new("demo/Widget")
//!     .method(MethodBuilder::constructor("java/lang/Object"))
//!     .build()?;
//!
//! let class = ClassFile::parse(&bytes)?;
//! assert_eq!(class.name()?, "demo/Widget");
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), leakscope::Error>(())
//! ```

pub mod builder;
pub mod code;
pub mod constpool;
pub mod descriptor;
pub mod flags;
pub mod mutf8;
pub mod stackmap;

use std::borrow::Cow;

pub use code::{CodeAttr, CodeAttribute, ExceptionHandler, LineNumber, LocalVariable};
pub use constpool::{Constant, ConstantPool, MemberRef};
pub use descriptor::{field_slot_size, MethodDescriptor};
pub use flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use stackmap::{FrameKind, StackMapFrame, VerificationType};

use crate::{
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Class file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// A raw attribute: name index plus undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Attribute payload
    pub data: Vec<u8>,
}

impl Attribute {
    /// Reads one `attribute_info` structure.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn parse(parser: &mut Parser) -> Result<Attribute> {
        let name_index = parser.read_be::<u16>()?;
        let length = parser.read_be::<u32>()?;
        let data = parser.read_bytes(length as usize)?.to_vec();
        Ok(Attribute { name_index, data })
    }

    /// Writes the attribute including its header.
    ///
    /// # Errors
    /// Returns an error if the payload exceeds the 32-bit length field.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("Attribute exceeds 4 GiB"))?;
        push_be(out, self.name_index);
        push_be(out, length);
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

fn parse_attributes(parser: &mut Parser) -> Result<Vec<Attribute>> {
    let count = parser.read_be::<u16>()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        attributes.push(Attribute::parse(parser)?);
    }
    Ok(attributes)
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) -> Result<()> {
    let count = u16::try_from(attributes.len())
        .map_err(|_| malformed_error!("Too many attributes - {}", attributes.len()))?;
    push_be(out, count);
    for attribute in attributes {
        attribute.write(out)?;
    }
    Ok(())
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Access flags
    pub access_flags: FieldAccessFlags,
    /// Index of the field name
    pub name_index: u16,
    /// Index of the field descriptor
    pub descriptor_index: u16,
    /// Field attributes, undecoded
    pub attributes: Vec<Attribute>,
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Access flags
    pub access_flags: MethodAccessFlags,
    /// Index of the method name
    pub name_index: u16,
    /// Index of the method descriptor
    pub descriptor_index: u16,
    /// Method attributes; `Code` is decoded on demand through [`MethodInfo::code`]
    pub attributes: Vec<Attribute>,
}

impl MethodInfo {
    /// Resolves the method name.
    ///
    /// # Errors
    /// Returns an error if the name index does not refer to a `Utf8` entry.
    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<Cow<'a, str>> {
        pool.utf8(self.name_index)
    }

    /// Resolves the method descriptor string.
    ///
    /// # Errors
    /// Returns an error if the descriptor index does not refer to a `Utf8` entry.
    pub fn descriptor<'a>(&self, pool: &'a ConstantPool) -> Result<Cow<'a, str>> {
        pool.utf8(self.descriptor_index)
    }

    /// Returns `true` for instance and class initializers (`<init>`).
    ///
    /// # Errors
    /// Returns an error if the name cannot be resolved.
    pub fn is_constructor(&self, pool: &ConstantPool) -> Result<bool> {
        Ok(self.name(pool)? == "<init>")
    }

    fn code_position(&self, pool: &ConstantPool) -> Result<Option<usize>> {
        for (position, attribute) in self.attributes.iter().enumerate() {
            if pool.utf8(attribute.name_index)? == code::names::CODE {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Decodes the `Code` attribute, if present.
    ///
    /// # Errors
    /// Returns an error if the attribute is malformed.
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.code_position(pool)? {
            Some(position) => Ok(Some(CodeAttribute::parse(
                &self.attributes[position].data,
                pool,
            )?)),
            None => Ok(None),
        }
    }

    /// Replaces the `Code` attribute, adding one if the method had none.
    ///
    /// # Errors
    /// Returns an error if the body cannot be serialized or the pool is full.
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) -> Result<()> {
        let data = code.to_bytes()?;
        match self.code_position(pool)? {
            Some(position) => self.attributes[position].data = data,
            None => {
                let name_index = pool.utf8_index(code::names::CODE)?;
                self.attributes.push(Attribute { name_index, data });
            }
        }
        Ok(())
    }
}

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version, e.g. 52 for Java 8
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: ClassAccessFlags,
    /// `Class` index of this class
    pub this_class: u16,
    /// `Class` index of the superclass, 0 only for `java/lang/Object`
    pub super_class: u16,
    /// `Class` indices of direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Class attributes, undecoded
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parses a complete class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::OutOfBounds`] for
    /// truncated input and [`crate::Error::Malformed`] for structural errors, including bytes
    /// after the last attribute.
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid magic 0x{:08X}", magic));
        }

        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = ClassAccessFlags::from_bits_retain(parser.read_be()?);
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;

        let interface_count = parser.read_be::<u16>()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(parser.read_be::<u16>()?);
        }

        let field_count = parser.read_be::<u16>()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            fields.push(FieldInfo {
                access_flags: FieldAccessFlags::from_bits_retain(parser.read_be()?),
                name_index: parser.read_be()?,
                descriptor_index: parser.read_be()?,
                attributes: parse_attributes(&mut parser)?,
            });
        }

        let method_count = parser.read_be::<u16>()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            methods.push(MethodInfo {
                access_flags: MethodAccessFlags::from_bits_retain(parser.read_be()?),
                name_index: parser.read_be()?,
                descriptor_index: parser.read_be()?,
                attributes: parse_attributes(&mut parser)?,
            });
        }

        let attributes = parse_attributes(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "Class file has {} trailing bytes",
                parser.remaining()
            ));
        }

        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.name()?;

        Ok(class)
    }

    /// Serializes the class file.
    ///
    /// # Errors
    /// Returns an error if any table exceeds its format limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        push_be(&mut out, MAGIC);
        push_be(&mut out, self.minor_version);
        push_be(&mut out, self.major_version);
        self.constant_pool.write(&mut out)?;
        push_be(&mut out, self.access_flags.bits());
        push_be(&mut out, self.this_class);
        push_be(&mut out, self.super_class);

        push_be(&mut out, count_u16(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            push_be(&mut out, *interface);
        }

        push_be(&mut out, count_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            push_be(&mut out, field.access_flags.bits());
            push_be(&mut out, field.name_index);
            push_be(&mut out, field.descriptor_index);
            write_attributes(&mut out, &field.attributes)?;
        }

        push_be(&mut out, count_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            push_be(&mut out, method.access_flags.bits());
            push_be(&mut out, method.name_index);
            push_be(&mut out, method.descriptor_index);
            write_attributes(&mut out, &method.attributes)?;
        }

        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// Internal name of this class, e.g. `org/opencv/core/Mat`.
    ///
    /// # Errors
    /// Returns an error if `this_class` does not refer to a `Class` entry.
    pub fn name(&self) -> Result<Cow<'_, str>> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object`.
    ///
    /// # Errors
    /// Returns an error if `super_class` is set but does not refer to a `Class` entry.
    pub fn super_name(&self) -> Result<Option<Cow<'_, str>>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(self.constant_pool.class_name(self.super_class)?))
    }

    /// Declared methods in file order.
    #[must_use]
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Finds a method by name and descriptor.
    ///
    /// # Errors
    /// Returns an error if a method name or descriptor cannot be resolved.
    pub fn method(&self, name: &str, descriptor: &str) -> Result<Option<&MethodInfo>> {
        Ok(self
            .find_method(name, descriptor)?
            .map(|position| &self.methods[position]))
    }

    /// Finds a method by name and descriptor for modification.
    ///
    /// # Errors
    /// Returns an error if a method name or descriptor cannot be resolved.
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Result<Option<&mut MethodInfo>> {
        Ok(self
            .find_method(name, descriptor)?
            .map(|position| &mut self.methods[position]))
    }

    fn find_method(&self, name: &str, descriptor: &str) -> Result<Option<usize>> {
        for (position, method) in self.methods.iter().enumerate() {
            if method.name(&self.constant_pool)? == name
                && method.descriptor(&self.constant_pool)? == descriptor
            {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }
}

fn count_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| malformed_error!("Too many {} - {}", what, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::factories::{simple_class, widget_class};

    #[test]
    fn parse_round_trip() {
        let bytes = widget_class();
        let class = ClassFile::parse(&bytes).unwrap();

        assert_eq!(class.name().unwrap(), "test/Widget");
        assert_eq!(class.super_name().unwrap().unwrap(), "java/lang/Object");
        assert_eq!(class.major_version, 52);
        assert!(class.access_flags.contains(ClassAccessFlags::PUBLIC));
        assert_eq!(class.methods().len(), 3);
        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn find_methods_and_code() {
        let class = ClassFile::parse(&widget_class()).unwrap();
        let pool = &class.constant_pool;

        let init = class.method("<init>", "()V").unwrap().unwrap();
        assert!(init.is_constructor(pool).unwrap());
        let code = init.code(pool).unwrap().unwrap();
        assert_eq!(code.code.last(), Some(&0xB1));

        assert!(class.method("release", "()V").unwrap().is_some());
        assert!(class.method("release", "(I)V").unwrap().is_none());
    }

    #[test]
    fn set_code_replaces_body() {
        let mut class = ClassFile::parse(&simple_class()).unwrap();
        let mut pool = class.constant_pool.clone();
        let method = class.method_mut("<init>", "()V").unwrap().unwrap();

        let mut code = method.code(&pool).unwrap().unwrap();
        code.code.insert(0, 0x00);
        code.max_locals = 3;
        method.set_code(&mut pool, &code).unwrap();

        let updated = method.code(&pool).unwrap().unwrap();
        assert_eq!(updated.code[0], 0x00);
        assert_eq!(updated.max_locals, 3);
    }

    #[test]
    fn reject_invalid_input() {
        assert!(matches!(ClassFile::parse(&[]), Err(Error::Empty)));
        assert!(matches!(
            ClassFile::parse(&[0xCA, 0xFE]),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]),
            Err(Error::Malformed { .. })
        ));

        let mut trailing = simple_class();
        trailing.push(0);
        assert!(ClassFile::parse(&trailing).is_err());
    }
}
