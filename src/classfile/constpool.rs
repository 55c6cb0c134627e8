//! The class file constant pool (JVMS §4.4).
//!
//! The constant pool is a 1-based table of symbolic entries that every other part of a class
//! file refers to by index. [`ConstantPool`] parses and serializes the table losslessly and adds
//! an interning API used when instrumentation needs new references: each `*_index` helper returns
//! the index of an equal existing entry or appends a new one.
//!
//! # Slot Layout
//!
//! Index 0 is never valid. `Long` and `Double` entries occupy two slots; the second slot is kept
//! as [`Constant::Unusable`] so that indices map directly onto the internal vector.
//!
//! # Examples
//!
//! ```rust
//! use leakscope::classfile::ConstantPool;
//!
//! let mut pool = ConstantPool::new();
//! let out = pool.field_ref_index("java/lang/System", "out", "Ljava/io/PrintStream;")?;
//! assert_eq!(pool.field_ref_index("java/lang/System", "out", "Ljava/io/PrintStream;")?, out);
//!
//! let member = pool.member_ref(out)?;
//! assert_eq!(member.owner, "java/lang/System");
//! assert_eq!(member.name, "out");
//! # Ok::<(), leakscope::Error>(())
//! ```

use std::{borrow::Cow, collections::HashMap, fmt};

use crate::{
    classfile::mutf8,
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Constant pool tags (JVMS Table 4.4-B).
#[allow(missing_docs)]
pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A single constant pool entry.
///
/// Floating point values are stored as their raw bits so that entries can be hashed and compared
/// for interning, and so that NaN payloads survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Placeholder for index 0 and the second slot of `Long`/`Double`
    Unusable,
    /// Modified UTF-8 bytes, kept undecoded
    Utf8(Vec<u8>),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float` as raw IEEE 754 bits
    Float(u32),
    /// `CONSTANT_Long`
    Long(i64),
    /// `CONSTANT_Double` as raw IEEE 754 bits
    Double(u64),
    /// `CONSTANT_Class`
    Class {
        /// Index of the internal class name
        name_index: u16,
    },
    /// `CONSTANT_String`
    String {
        /// Index of the string contents
        string_index: u16,
    },
    /// `CONSTANT_Fieldref`
    FieldRef {
        /// Index of the owning `Class`
        class_index: u16,
        /// Index of the `NameAndType`
        name_and_type_index: u16,
    },
    /// `CONSTANT_Methodref`
    MethodRef {
        /// Index of the owning `Class`
        class_index: u16,
        /// Index of the `NameAndType`
        name_and_type_index: u16,
    },
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodRef {
        /// Index of the owning `Class`
        class_index: u16,
        /// Index of the `NameAndType`
        name_and_type_index: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// Index of the member name
        name_index: u16,
        /// Index of the member descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_MethodHandle`
    MethodHandle {
        /// Reference kind 1..=9
        reference_kind: u8,
        /// Index of the referenced member
        reference_index: u16,
    },
    /// `CONSTANT_MethodType`
    MethodType {
        /// Index of the method descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_Dynamic`
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method_attr_index: u16,
        /// Index of the `NameAndType`
        name_and_type_index: u16,
    },
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method_attr_index: u16,
        /// Index of the `NameAndType`
        name_and_type_index: u16,
    },
    /// `CONSTANT_Module`
    Module {
        /// Index of the module name
        name_index: u16,
    },
    /// `CONSTANT_Package`
    Package {
        /// Index of the package name
        name_index: u16,
    },
}

impl Constant {
    /// Number of pool slots this entry occupies.
    #[must_use]
    pub fn slots(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the owning class, e.g. `java/lang/System`
    pub owner: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

impl MemberRef {
    /// Creates a member reference from its three components.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        MemberRef {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// The parsed constant pool of a class file.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Creates an empty pool containing only the reserved index 0.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }

    /// Parses a constant pool, starting at the `constant_pool_count` field.
    ///
    /// # Errors
    /// Returns an error for unknown tags or truncated entries.
    pub fn parse(parser: &mut Parser) -> Result<ConstantPool> {
        let count = parser.read_be::<u16>()?;
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut pool = ConstantPool::new();
        while pool.entries.len() < usize::from(count) {
            let offset = parser.pos();
            let tag = parser.read_be::<u8>()?;
            let constant = match tag {
                tags::UTF8 => {
                    let length = parser.read_be::<u16>()?;
                    Constant::Utf8(parser.read_bytes(usize::from(length))?.to_vec())
                }
                tags::INTEGER => Constant::Integer(parser.read_be::<i32>()?),
                tags::FLOAT => Constant::Float(parser.read_be::<u32>()?),
                tags::LONG => Constant::Long(parser.read_be::<i64>()?),
                tags::DOUBLE => Constant::Double(parser.read_be::<u64>()?),
                tags::CLASS => Constant::Class {
                    name_index: parser.read_be()?,
                },
                tags::STRING => Constant::String {
                    string_index: parser.read_be()?,
                },
                tags::FIELD_REF => Constant::FieldRef {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::METHOD_REF => Constant::MethodRef {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::NAME_AND_TYPE => Constant::NameAndType {
                    name_index: parser.read_be()?,
                    descriptor_index: parser.read_be()?,
                },
                tags::METHOD_HANDLE => Constant::MethodHandle {
                    reference_kind: parser.read_be()?,
                    reference_index: parser.read_be()?,
                },
                tags::METHOD_TYPE => Constant::MethodType {
                    descriptor_index: parser.read_be()?,
                },
                tags::DYNAMIC => Constant::Dynamic {
                    bootstrap_method_attr_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: parser.read_be()?,
                    name_and_type_index: parser.read_be()?,
                },
                tags::MODULE => Constant::Module {
                    name_index: parser.read_be()?,
                },
                tags::PACKAGE => Constant::Package {
                    name_index: parser.read_be()?,
                },
                _ => {
                    return Err(malformed_error!(
                        "Unknown constant pool tag {} at offset {}",
                        tag,
                        offset
                    ))
                }
            };

            if constant.slots() == 2 && pool.entries.len() + 2 > usize::from(count) {
                return Err(malformed_error!(
                    "Wide constant at index {} overruns the constant pool",
                    pool.entries.len()
                ));
            }
            pool.append(constant);
        }

        Ok(pool)
    }

    /// Serializes the pool, including the leading `constant_pool_count`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool has grown too large.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.entries.len()).map_err(|_| Error::ConstantPoolOverflow)?;
        push_be(out, count);

        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(bytes) => {
                    let length = u16::try_from(bytes.len())
                        .map_err(|_| malformed_error!("Utf8 constant exceeds 65535 bytes"))?;
                    out.push(tags::UTF8);
                    push_be(out, length);
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(value) => {
                    out.push(tags::INTEGER);
                    push_be(out, *value);
                }
                Constant::Float(bits) => {
                    out.push(tags::FLOAT);
                    push_be(out, *bits);
                }
                Constant::Long(value) => {
                    out.push(tags::LONG);
                    push_be(out, *value);
                }
                Constant::Double(bits) => {
                    out.push(tags::DOUBLE);
                    push_be(out, *bits);
                }
                Constant::Class { name_index } => {
                    out.push(tags::CLASS);
                    push_be(out, *name_index);
                }
                Constant::String { string_index } => {
                    out.push(tags::STRING);
                    push_be(out, *string_index);
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tags::FIELD_REF);
                    push_be(out, *class_index);
                    push_be(out, *name_and_type_index);
                }
                Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tags::METHOD_REF);
                    push_be(out, *class_index);
                    push_be(out, *name_and_type_index);
                }
                Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tags::INTERFACE_METHOD_REF);
                    push_be(out, *class_index);
                    push_be(out, *name_and_type_index);
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    out.push(tags::NAME_AND_TYPE);
                    push_be(out, *name_index);
                    push_be(out, *descriptor_index);
                }
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    out.push(tags::METHOD_HANDLE);
                    out.push(*reference_kind);
                    push_be(out, *reference_index);
                }
                Constant::MethodType { descriptor_index } => {
                    out.push(tags::METHOD_TYPE);
                    push_be(out, *descriptor_index);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    out.push(tags::DYNAMIC);
                    push_be(out, *bootstrap_method_attr_index);
                    push_be(out, *name_and_type_index);
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    out.push(tags::INVOKE_DYNAMIC);
                    push_be(out, *bootstrap_method_attr_index);
                    push_be(out, *name_and_type_index);
                }
                Constant::Module { name_index } => {
                    out.push(tags::MODULE);
                    push_be(out, *name_index);
                }
                Constant::Package { name_index } => {
                    out.push(tags::PACKAGE);
                    push_be(out, *name_index);
                }
            }
        }

        Ok(())
    }

    /// Value of `constant_pool_count`: number of slots including index 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no entries besides index 0.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for index 0, indices past the end and the unusable
    /// second slot of wide constants.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool size {})",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Iterates over `(index, constant)` pairs, skipping unusable slots.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, constant)| !matches!(constant, Constant::Unusable))
            .map(|(index, constant)| (index as u16, constant))
    }

    /// Decodes the `Utf8` entry at `index`.
    ///
    /// # Errors
    /// Returns an error if the entry is missing, not a `Utf8` entry or not valid modified UTF-8.
    pub fn utf8(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.get(index)? {
            Constant::Utf8(bytes) => mutf8::decode(bytes),
            other => Err(malformed_error!(
                "Constant {} is not Utf8 - {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves the internal name of the `Class` entry at `index`.
    ///
    /// # Errors
    /// Returns an error if the entry is not a `Class` or its name cannot be decoded.
    pub fn class_name(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(malformed_error!(
                "Constant {} is not a Class - {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `NameAndType` entry into `(name, descriptor)`.
    ///
    /// # Errors
    /// Returns an error if the entry is not a `NameAndType`.
    pub fn name_and_type(&self, index: u16) -> Result<(Cow<'_, str>, Cow<'_, str>)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(malformed_error!(
                "Constant {} is not a NameAndType - {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` entry.
    ///
    /// # Errors
    /// Returns an error if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        match self.get(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(MemberRef {
                    owner: self.class_name(*class_index)?.into_owned(),
                    name: name.into_owned(),
                    descriptor: descriptor.into_owned(),
                })
            }
            other => Err(malformed_error!(
                "Constant {} is not a member reference - {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves the method descriptor of an `InvokeDynamic` entry.
    ///
    /// # Errors
    /// Returns an error if the entry is not an `InvokeDynamic`.
    pub fn invoke_dynamic_descriptor(&self, index: u16) -> Result<Cow<'_, str>> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                name_and_type_index,
                ..
            } => Ok(self.name_and_type(*name_and_type_index)?.1),
            other => Err(malformed_error!(
                "Constant {} is not an InvokeDynamic - {:?}",
                index,
                other
            )),
        }
    }

    /// Returns the index of `constant`, appending it if no equal entry exists.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }

        if self.entries.len() + constant.slots() > usize::from(u16::MAX) {
            return Err(Error::ConstantPoolOverflow);
        }

        Ok(self.append(constant))
    }

    /// Interns a `Utf8` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn utf8_index(&mut self, text: &str) -> Result<u16> {
        self.intern(Constant::Utf8(mutf8::encode(text)))
    }

    /// Interns a `Class` entry for an internal class name.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn class_index(&mut self, name: &str) -> Result<u16> {
        let name_index = self.utf8_index(name)?;
        self.intern(Constant::Class { name_index })
    }

    /// Interns a `String` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn string_index(&mut self, text: &str) -> Result<u16> {
        let string_index = self.utf8_index(text)?;
        self.intern(Constant::String { string_index })
    }

    /// Interns a `NameAndType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.utf8_index(name)?;
        let descriptor_index = self.utf8_index(descriptor)?;
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Interns a `Fieldref` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn field_ref_index(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class_index(owner)?;
        let name_and_type_index = self.name_and_type_index(name, descriptor)?;
        self.intern(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Interns a `Methodref`, or an `InterfaceMethodref` if `interface` is set.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolOverflow`] if the pool is full.
    pub fn method_ref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.class_index(owner)?;
        let name_and_type_index = self.name_and_type_index(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            })
        } else {
            self.intern(Constant::MethodRef {
                class_index,
                name_and_type_index,
            })
        }
    }

    fn append(&mut self, constant: Constant) -> u16 {
        let index = self.entries.len() as u16;
        let wide = constant.slots() == 2;
        self.lookup.entry(constant.clone()).or_insert(index);
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }
}
