//! The `Code` attribute of a method (JVMS §4.7.3).
//!
//! [`CodeAttribute`] holds a method body: operand stack and local variable limits, the raw
//! bytecode, the exception table and the nested attributes. Nested attributes that record
//! bytecode offsets are decoded into typed [`CodeAttr`] variants so a rewriter can move them
//! along with the instructions they describe; anything else is carried as an opaque
//! [`crate::classfile::Attribute`].

use crate::{
    classfile::{stackmap, stackmap::StackMapFrame, Attribute, ConstantPool},
    file::{io::push_be, parser::Parser},
    Result,
};

/// Attribute names with special handling inside `Code`.
#[allow(missing_docs)]
pub mod names {
    pub const CODE: &str = "Code";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
}

/// One entry of the exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,
    /// End of the protected range (exclusive)
    pub end_pc: u16,
    /// Start of the handler code
    pub handler_pc: u16,
    /// `Class` index of the caught type, 0 for `finally`
    pub catch_type: u16,
}

/// One `LineNumberTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First instruction of the line
    pub start_pc: u16,
    /// Source line number
    pub line_number: u16,
}

/// One `LocalVariableTable` or `LocalVariableTypeTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// Start of the live range
    pub start_pc: u16,
    /// Length of the live range
    pub length: u16,
    /// Variable name
    pub name_index: u16,
    /// Descriptor, or generic signature for the type table
    pub descriptor_index: u16,
    /// Local variable slot
    pub index: u16,
}

/// A nested attribute of a `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttr {
    /// `LineNumberTable`
    LineNumbers {
        /// Index of the attribute name
        name_index: u16,
        /// Table entries
        entries: Vec<LineNumber>,
    },
    /// `LocalVariableTable` or `LocalVariableTypeTable`, which share a layout
    LocalVariables {
        /// Index of the attribute name
        name_index: u16,
        /// Table entries
        entries: Vec<LocalVariable>,
    },
    /// `StackMapTable`
    StackMap {
        /// Index of the attribute name
        name_index: u16,
        /// Frames at absolute offsets
        frames: Vec<StackMapFrame>,
    },
    /// Anything else, kept verbatim
    Other(Attribute),
}

impl CodeAttr {
    /// Constant pool index of the attribute name.
    #[must_use]
    pub fn name_index(&self) -> u16 {
        match self {
            CodeAttr::LineNumbers { name_index, .. }
            | CodeAttr::LocalVariables { name_index, .. }
            | CodeAttr::StackMap { name_index, .. } => *name_index,
            CodeAttr::Other(attribute) => attribute.name_index,
        }
    }

    fn parse(attribute: Attribute, pool: &ConstantPool) -> Result<CodeAttr> {
        let name = pool.utf8(attribute.name_index)?;
        match name.as_ref() {
            names::STACK_MAP_TABLE => {
                return Ok(CodeAttr::StackMap {
                    name_index: attribute.name_index,
                    frames: stackmap::parse(&attribute.data)?,
                })
            }
            names::LINE_NUMBER_TABLE
            | names::LOCAL_VARIABLE_TABLE
            | names::LOCAL_VARIABLE_TYPE_TABLE => {}
            _ => return Ok(CodeAttr::Other(attribute)),
        }

        let mut parser = Parser::new(&attribute.data);
        let parsed = match name.as_ref() {
            names::LINE_NUMBER_TABLE => {
                let count = parser.read_be::<u16>()?;
                let mut entries = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    entries.push(LineNumber {
                        start_pc: parser.read_be()?,
                        line_number: parser.read_be()?,
                    });
                }
                CodeAttr::LineNumbers {
                    name_index: attribute.name_index,
                    entries,
                }
            }
            _ => {
                let count = parser.read_be::<u16>()?;
                let mut entries = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    entries.push(LocalVariable {
                        start_pc: parser.read_be()?,
                        length: parser.read_be()?,
                        name_index: parser.read_be()?,
                        descriptor_index: parser.read_be()?,
                        index: parser.read_be()?,
                    });
                }
                CodeAttr::LocalVariables {
                    name_index: attribute.name_index,
                    entries,
                }
            }
        };

        if parser.has_more_data() {
            return Err(malformed_error!(
                "Attribute {} has {} trailing bytes",
                name,
                parser.remaining()
            ));
        }

        Ok(parsed)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        match self {
            CodeAttr::LineNumbers { entries, .. } => {
                push_be(&mut body, table_len(entries.len())?);
                for entry in entries {
                    push_be(&mut body, entry.start_pc);
                    push_be(&mut body, entry.line_number);
                }
            }
            CodeAttr::LocalVariables { entries, .. } => {
                push_be(&mut body, table_len(entries.len())?);
                for entry in entries {
                    push_be(&mut body, entry.start_pc);
                    push_be(&mut body, entry.length);
                    push_be(&mut body, entry.name_index);
                    push_be(&mut body, entry.descriptor_index);
                    push_be(&mut body, entry.index);
                }
            }
            CodeAttr::StackMap { frames, .. } => body = stackmap::encode(frames)?,
            CodeAttr::Other(attribute) => return attribute.write(out),
        }

        Attribute {
            name_index: self.name_index(),
            data: body,
        }
        .write(out)
    }
}

/// A parsed `Code` attribute body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth in slots
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Exception handlers in table order
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes in file order
    pub attributes: Vec<CodeAttr>,
}

impl CodeAttribute {
    /// Parses the body of a `Code` attribute.
    ///
    /// # Errors
    /// Returns an error if the body is truncated, has trailing bytes or contains an invalid
    /// nested attribute.
    pub fn parse(data: &[u8], pool: &ConstantPool) -> Result<CodeAttribute> {
        let mut parser = Parser::new(data);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;

        let code_length = parser.read_be::<u32>()?;
        if code_length == 0 || code_length > 65535 {
            return Err(malformed_error!("Invalid code_length {}", code_length));
        }
        let code = parser.read_bytes(code_length as usize)?.to_vec();

        let handler_count = parser.read_be::<u16>()?;
        let mut exception_table = Vec::with_capacity(usize::from(handler_count));
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: parser.read_be()?,
                end_pc: parser.read_be()?,
                handler_pc: parser.read_be()?,
                catch_type: parser.read_be()?,
            });
        }

        let attribute_count = parser.read_be::<u16>()?;
        let mut attributes = Vec::with_capacity(usize::from(attribute_count));
        for _ in 0..attribute_count {
            let attribute = Attribute::parse(&mut parser)?;
            attributes.push(CodeAttr::parse(attribute, pool)?);
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "Code attribute has {} trailing bytes",
                parser.remaining()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Serializes the attribute body, without the attribute name and length header.
    ///
    /// # Errors
    /// Returns an error if a table or the bytecode exceeds its format limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.is_empty() || self.code.len() > 65535 {
            return Err(malformed_error!("Invalid code length {}", self.code.len()));
        }

        let mut out = Vec::with_capacity(self.code.len() + 32);
        push_be(&mut out, self.max_stack);
        push_be(&mut out, self.max_locals);
        push_be(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);

        push_be(&mut out, table_len(self.exception_table.len())?);
        for handler in &self.exception_table {
            push_be(&mut out, handler.start_pc);
            push_be(&mut out, handler.end_pc);
            push_be(&mut out, handler.handler_pc);
            push_be(&mut out, handler.catch_type);
        }

        push_be(&mut out, table_len(self.attributes.len())?);
        for attribute in &self.attributes {
            attribute.write(&mut out)?;
        }

        Ok(out)
    }

    /// Returns the decoded stack map frames, if the method has a `StackMapTable`.
    #[must_use]
    pub fn stack_map(&self) -> Option<&[StackMapFrame]> {
        self.attributes.iter().find_map(|attribute| match attribute {
            CodeAttr::StackMap { frames, .. } => Some(frames.as_slice()),
            _ => None,
        })
    }
}

fn table_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| malformed_error!("Table length {} exceeds 65535", len))
}
