//! Big-endian, bounds-checked reading and writing of primitive values.
//!
//! The class file format stores every multi-byte quantity in big-endian order (JVMS §4.1).
//! This module provides the [`crate::file::io::ClassIO`] trait together with a small set of free
//! functions that read and write values at an explicit offset, advancing the offset on success
//! and failing with [`crate::Error::OutOfBounds`] instead of panicking on short buffers.
//!
//! # Key Components
//!
//! - [`crate::file::io::ClassIO`] - Conversion trait implemented for all fixed-size integers
//! - [`crate::file::io::read_be`] / [`crate::file::io::read_be_at`] - Reading
//! - [`crate::file::io::write_be_at`] - Patching a value into an existing buffer
//! - [`crate::file::io::push_be`] - Appending a value to a growing buffer
//!
//! # Examples
//!
//! ```rust,ignore
//! use leakscope::file::io::{read_be_at, push_be};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x3D];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! let major: u16 = read_be_at(&data, &mut offset)?;
//! assert_eq!(magic, 0xCAFE_BABE);
//! assert_eq!(major, 61);
//!
//! let mut out = Vec::new();
//! push_be(&mut out, magic);
//! assert_eq!(out, [0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), leakscope::Error>(())
//! ```

use crate::Result;

/// Trait for primitive types that can be read from and written to class file byte streams.
///
/// All implementations are pure conversions without shared state and therefore thread-safe.
pub trait ClassIO: Sized + Copy {
    /// Byte array type matching the size of `Self`.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read `Self` from big-endian bytes
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write `Self` as big-endian bytes
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Reads a big-endian value of type `T` from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Reads a big-endian value of type `T` at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .ok_or(out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Writes `value` in big-endian order at `offset` and advances `offset` past it.
///
/// Used to back-patch lengths and branch offsets once their final value is known.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn write_be_at<T: ClassIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .ok_or(out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_be_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Appends `value` in big-endian order to `buffer`.
pub fn push_be<T: ClassIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_be_bytes().as_ref());
}
