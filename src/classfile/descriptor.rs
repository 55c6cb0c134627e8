//! Field and method descriptors (JVMS §4.3).
//!
//! Only the information needed for stack and local-variable bookkeeping is extracted: the
//! parameter types as written and the number of slots each value occupies. `long` and `double`
//! take two slots, `void` takes none and every other type takes one.

use std::fmt;

use crate::Result;

/// Number of operand stack or local variable slots a value of field type `ty` occupies.
///
/// `V` (void) yields 0 so return types can be passed through unchanged.
#[must_use]
pub fn field_slot_size(ty: &str) -> u16 {
    match ty.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        Some(b'V') | None => 0,
        _ => 1,
    }
}

/// A parsed method descriptor such as `(ILjava/lang/String;[J)V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter field types in declaration order
    pub parameters: Vec<String>,
    /// Return type, `V` for void
    pub return_type: String,
}

impl MethodDescriptor {
    /// Parses a method descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is not well formed.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let Some(rest) = descriptor.strip_prefix('(') else {
            return Err(malformed_error!(
                "Method descriptor must start with '(' - {}",
                descriptor
            ));
        };

        let mut parameters = Vec::new();
        let mut remaining = rest;
        loop {
            if let Some(tail) = remaining.strip_prefix(')') {
                remaining = tail;
                break;
            }
            let (ty, tail) = split_field_type(remaining, descriptor)?;
            parameters.push(ty.to_string());
            remaining = tail;
        }

        let return_type = if remaining == "V" {
            remaining.to_string()
        } else {
            let (ty, tail) = split_field_type(remaining, descriptor)?;
            if !tail.is_empty() {
                return Err(malformed_error!(
                    "Trailing characters in method descriptor - {}",
                    descriptor
                ));
            }
            ty.to_string()
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Total slots occupied by the parameters, excluding any receiver.
    #[must_use]
    pub fn argument_slots(&self) -> u16 {
        self.parameters.iter().map(|p| field_slot_size(p)).sum()
    }

    /// Slots pushed by the return value.
    #[must_use]
    pub fn return_slots(&self) -> u16 {
        field_slot_size(&self.return_type)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.parameters.concat(), self.return_type)
    }
}

/// Splits one field type off the front of `input`.
fn split_field_type<'a>(input: &'a str, descriptor: &str) -> Result<(&'a str, &'a str)> {
    let bytes = input.as_bytes();
    let mut end = 0;
    while bytes.get(end) == Some(&b'[') {
        end += 1;
    }

    match bytes.get(end) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => end += 1,
        Some(b'L') => match input[end..].find(';') {
            Some(semicolon) if semicolon > 1 => end += semicolon + 1,
            _ => {
                return Err(malformed_error!(
                    "Unterminated class type in descriptor - {}",
                    descriptor
                ))
            }
        },
        _ => {
            return Err(malformed_error!(
                "Invalid field type in descriptor - {}",
                descriptor
            ))
        }
    }

    Ok(input.split_at(end))
}
