//! The `StackMapTable` attribute (JVMS §4.7.4).
//!
//! On disk every frame stores its position as a delta from the previous frame, and the frame
//! type byte doubles as part of that delta for the compact forms. Inserting code changes those
//! deltas, so frames are decoded into [`StackMapFrame`]s carrying absolute bytecode offsets and
//! re-encoded afterwards, choosing the compact or extended form that fits the new delta.
//!
//! # Frame Forms
//!
//! | Type byte | Form                                  |
//! |-----------|---------------------------------------|
//! | 0-63      | `same_frame`                          |
//! | 64-127    | `same_locals_1_stack_item_frame`      |
//! | 247       | `same_locals_1_stack_item_frame_extended` |
//! | 248-250   | `chop_frame`                          |
//! | 251       | `same_frame_extended`                 |
//! | 252-254   | `append_frame`                        |
//! | 255       | `full_frame`                          |

use crate::{
    file::{io::push_be, parser::Parser},
    Result,
};

/// A verification type in a stack map frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationType {
    /// `Top_variable_info`
    Top,
    /// `Integer_variable_info`
    Integer,
    /// `Float_variable_info`
    Float,
    /// `Double_variable_info`
    Double,
    /// `Long_variable_info`
    Long,
    /// `Null_variable_info`
    Null,
    /// `UninitializedThis_variable_info`
    UninitializedThis,
    /// `Object_variable_info` with its constant pool `Class` index
    Object(u16),
    /// `Uninitialized_variable_info` with the offset of the creating `new` instruction
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(parser: &mut Parser) -> Result<VerificationType> {
        let tag = parser.read_be::<u8>()?;
        Ok(match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(parser.read_be()?),
            8 => VerificationType::Uninitialized(parser.read_be()?),
            _ => return Err(malformed_error!("Invalid verification type tag {}", tag)),
        })
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(class_index) => {
                out.push(7);
                push_be(out, class_index);
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                push_be(out, offset);
            }
        }
    }
}

/// The shape of a frame relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Same locals as the previous frame, empty stack
    Same,
    /// Same locals as the previous frame, one stack item
    SameLocals1StackItem(VerificationType),
    /// The last `n` locals (1..=3) are absent, empty stack
    Chop(u8),
    /// 1..=3 additional locals, empty stack
    Append(Vec<VerificationType>),
    /// Explicit locals and stack
    Full {
        /// Local variable types
        locals: Vec<VerificationType>,
        /// Operand stack types
        stack: Vec<VerificationType>,
    },
}

/// A decoded stack map frame at an absolute bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// Bytecode offset the frame applies to
    pub offset: u32,
    /// Frame contents
    pub kind: FrameKind,
}

impl StackMapFrame {
    /// Applies `map` to the frame offset and to every `Uninitialized` verification type.
    ///
    /// # Errors
    /// Propagates errors from `map`, and fails if a mapped `new` offset exceeds 65535.
    pub fn remap<F>(&mut self, map: &F) -> Result<()>
    where
        F: Fn(u32) -> Result<u32>,
    {
        self.offset = map(self.offset)?;

        let remap_type = |ty: &mut VerificationType| -> Result<()> {
            if let VerificationType::Uninitialized(offset) = ty {
                *offset = u16::try_from(map(u32::from(*offset))?)
                    .map_err(|_| malformed_error!("Uninitialized offset exceeds 65535"))?;
            }
            Ok(())
        };

        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => {}
            FrameKind::SameLocals1StackItem(ty) => remap_type(ty)?,
            FrameKind::Append(locals) => {
                for ty in locals {
                    remap_type(ty)?;
                }
            }
            FrameKind::Full { locals, stack } => {
                for ty in locals.iter_mut().chain(stack.iter_mut()) {
                    remap_type(ty)?;
                }
            }
        }

        Ok(())
    }
}

/// Parses the body of a `StackMapTable` attribute.
///
/// # Errors
/// Returns an error for reserved frame types, invalid verification types or truncated data.
pub fn parse(data: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;

    let mut frames = Vec::with_capacity(usize::from(count));
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, kind) = match frame_type {
            0..=63 => (u16::from(frame_type), FrameKind::Same),
            64..=127 => (
                u16::from(frame_type - 64),
                FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
            ),
            247 => {
                let delta = parser.read_be::<u16>()?;
                (
                    delta,
                    FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
                )
            }
            248..=250 => (parser.read_be::<u16>()?, FrameKind::Chop(251 - frame_type)),
            251 => (parser.read_be::<u16>()?, FrameKind::Same),
            252..=254 => {
                let delta = parser.read_be::<u16>()?;
                let mut locals = Vec::with_capacity(usize::from(frame_type - 251));
                for _ in 0..frame_type - 251 {
                    locals.push(VerificationType::parse(&mut parser)?);
                }
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = parser.read_be::<u16>()?;
                let locals = parse_types(&mut parser)?;
                let stack = parse_types(&mut parser)?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => {
                return Err(malformed_error!(
                    "Reserved stack map frame type {}",
                    frame_type
                ))
            }
        };

        let offset = match previous {
            None => u32::from(delta),
            Some(previous) => previous + u32::from(delta) + 1,
        };
        previous = Some(offset);
        frames.push(StackMapFrame { offset, kind });
    }

    if parser.has_more_data() {
        return Err(malformed_error!(
            "StackMapTable has {} trailing bytes",
            parser.remaining()
        ));
    }

    Ok(frames)
}

/// Encodes frames into the body of a `StackMapTable` attribute.
///
/// # Errors
/// Returns an error if frame offsets are not strictly increasing or do not fit the format.
pub fn encode(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let count = u16::try_from(frames.len())
        .map_err(|_| malformed_error!("Too many stack map frames - {}", frames.len()))?;

    let mut out = Vec::new();
    push_be(&mut out, count);

    let mut previous: Option<u32> = None;
    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(previous) if frame.offset > previous => frame.offset - previous - 1,
            Some(previous) => {
                return Err(malformed_error!(
                    "Stack map frame at {} does not follow frame at {}",
                    frame.offset,
                    previous
                ))
            }
        };
        previous = Some(frame.offset);

        let delta = u16::try_from(delta)
            .map_err(|_| malformed_error!("Stack map frame delta {} exceeds 65535", delta))?;

        match &frame.kind {
            FrameKind::Same if delta <= 63 => out.push(delta as u8),
            FrameKind::Same => {
                out.push(251);
                push_be(&mut out, delta);
            }
            FrameKind::SameLocals1StackItem(ty) if delta <= 63 => {
                out.push(64 + delta as u8);
                ty.write(&mut out);
            }
            FrameKind::SameLocals1StackItem(ty) => {
                out.push(247);
                push_be(&mut out, delta);
                ty.write(&mut out);
            }
            FrameKind::Chop(k @ 1..=3) => {
                out.push(251 - k);
                push_be(&mut out, delta);
            }
            FrameKind::Append(locals) if (1..=3).contains(&locals.len()) => {
                out.push(251 + locals.len() as u8);
                push_be(&mut out, delta);
                for ty in locals {
                    ty.write(&mut out);
                }
            }
            FrameKind::Full { locals, stack } => {
                out.push(255);
                push_be(&mut out, delta);
                write_types(&mut out, locals)?;
                write_types(&mut out, stack)?;
            }
            other => {
                return Err(malformed_error!(
                    "Stack map frame at {} cannot be encoded - {:?}",
                    frame.offset,
                    other
                ))
            }
        }
    }

    Ok(out)
}

fn parse_types(parser: &mut Parser) -> Result<Vec<VerificationType>> {
    let count = parser.read_be::<u16>()?;
    let mut types = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        types.push(VerificationType::parse(parser)?);
    }
    Ok(types)
}

fn write_types(out: &mut Vec<u8>, types: &[VerificationType]) -> Result<()> {
    let count = u16::try_from(types.len())
        .map_err(|_| malformed_error!("Too many verification types - {}", types.len()))?;
    push_be(out, count);
    for ty in types {
        ty.write(out);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_forms() {
        #[rustfmt::skip]
        let data = [
            0x00, 0x06,
            0x05,                         // same @5
            0x41, 0x01,                   // same_locals_1 int @7
            0xF7, 0x01, 0x00, 0x07, 0x00, 0x03, // sl1 extended Object(#3) @264
            0xF9, 0x00, 0x02,             // chop 2 @267
            0xFC, 0x00, 0x00, 0x08, 0x00, 0x04, // append Uninitialized(4) @268
            0xFF, 0x00, 0x01, 0x00, 0x01, 0x06, 0x00, 0x01, 0x04, // full @270
        ];

        let frames = parse(&data).unwrap();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0], StackMapFrame { offset: 5, kind: FrameKind::Same });
        assert_eq!(frames[1].offset, 7);
        assert_eq!(
            frames[1].kind,
            FrameKind::SameLocals1StackItem(VerificationType::Integer)
        );
        assert_eq!(frames[2].offset, 264);
        assert_eq!(frames[3], StackMapFrame { offset: 267, kind: FrameKind::Chop(2) });
        assert_eq!(
            frames[4].kind,
            FrameKind::Append(vec![VerificationType::Uninitialized(4)])
        );
        assert_eq!(frames[5].offset, 270);

        assert_eq!(encode(&frames).unwrap(), data);
    }

    #[test]
    fn encode_picks_extended_forms() {
        let frames = vec![
            StackMapFrame { offset: 100, kind: FrameKind::Same },
            StackMapFrame {
                offset: 300,
                kind: FrameKind::SameLocals1StackItem(VerificationType::Null),
            },
        ];
        let data = encode(&frames).unwrap();
        assert_eq!(data, [0x00, 0x02, 0xFB, 0x00, 0x64, 0xF7, 0x00, 0xC7, 0x05]);
        assert_eq!(parse(&data).unwrap(), frames);
    }

    #[test]
    fn remap_moves_uninitialized() {
        let mut frame = StackMapFrame {
            offset: 10,
            kind: FrameKind::Full {
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![VerificationType::Uninitialized(3), VerificationType::Uninitialized(3)],
            },
        };
        frame.remap(&|offset| Ok(offset + 20)).unwrap();
        assert_eq!(frame.offset, 30);
        assert_eq!(
            frame.kind,
            FrameKind::Full {
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![
                    VerificationType::Uninitialized(23),
                    VerificationType::Uninitialized(23)
                ],
            }
        );
    }

    #[test]
    fn reject_unordered_and_reserved() {
        let frames = vec![
            StackMapFrame { offset: 10, kind: FrameKind::Same },
            StackMapFrame { offset: 10, kind: FrameKind::Same },
        ];
        assert!(encode(&frames).is_err());
        assert!(parse(&[0x00, 0x01, 0x80]).is_err());
        assert!(parse(&[0x00, 0x01, 0x00, 0x00]).is_err());
    }
}
