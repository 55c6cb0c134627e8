//! Java "modified UTF-8" as used by `CONSTANT_Utf8_info` (JVMS §4.4.7).
//!
//! Modified UTF-8 differs from standard UTF-8 in two ways: the NUL character is encoded as the
//! two bytes `C0 80`, and supplementary characters are stored as a UTF-16 surrogate pair with
//! each surrogate encoded in three bytes. Strings that contain neither are byte-identical in both
//! encodings, which [`decode`] exploits to avoid allocations for the common case.

use std::borrow::Cow;

use crate::Result;

/// Encodes `text` as modified UTF-8.
#[must_use]
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

/// Decodes modified UTF-8 bytes.
///
/// Unpaired surrogates, which Java strings may legally contain, are replaced with U+FFFD.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for truncated or invalid byte sequences.
pub fn decode(bytes: &[u8]) -> Result<Cow<'_, str>> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if !text.contains('\0') && !text.chars().any(|c| u32::from(c) > 0xFFFF) {
            return Ok(Cow::Borrowed(text));
        }
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let first = bytes[index];
        let continuation = |at: usize| -> Result<u16> {
            match bytes.get(at) {
                Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
                _ => Err(malformed_error!(
                    "Invalid modified UTF-8 continuation byte at {}",
                    at
                )),
            }
        };

        if first & 0x80 == 0 {
            units.push(u16::from(first));
            index += 1;
        } else if first & 0xE0 == 0xC0 {
            units.push((u16::from(first & 0x1F) << 6) | continuation(index + 1)?);
            index += 2;
        } else if first & 0xF0 == 0xE0 {
            units.push(
                (u16::from(first & 0x0F) << 12)
                    | (continuation(index + 1)? << 6)
                    | continuation(index + 2)?,
            );
            index += 3;
        } else {
            return Err(malformed_error!(
                "Invalid modified UTF-8 lead byte 0x{:02X} at {}",
                first,
                index
            ));
        }
    }

    Ok(Cow::Owned(String::from_utf16_lossy(&units)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identical() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object");
        assert!(matches!(decode(b"<init>").unwrap(), Cow::Borrowed("<init>")));
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), [0x61, 0xC0, 0x80, 0x62]);
        assert_eq!(decode(&[0x61, 0xC0, 0x80, 0x62]).unwrap(), "a\0b");
    }

    #[test]
    fn supplementary_characters_use_surrogates() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded, [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn two_and_three_byte_forms() {
        let text = "é中";
        let encoded = encode(text);
        assert_eq!(encoded, text.as_bytes());
        assert_eq!(decode(&encoded).unwrap(), text);
    }

    #[test]
    fn truncated_sequence_fails() {
        assert!(decode(&[0xE4, 0xB8]).is_err());
        assert!(decode(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
    }
}
