//! Helpers to read and write the variable-width big-endian integer fields
//! used for entity IDs and transaction sequence numbers.
use core::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Generic byte conversion error for insufficiently sized buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ByteConversionError {
    #[error("target slice with size {found} too small, expected at least {expected} bytes")]
    ToSliceTooSmall { found: usize, expected: usize },
    #[error("source slice with size {found} too small, expected at least {expected} bytes")]
    FromSliceTooSmall { found: usize, expected: usize },
}

/// The maximum value which can be stored in a big-endian field of the given octet width.
#[inline]
pub const fn max_value_for_width(width: usize) -> u64 {
    if width >= 8 {
        return u64::MAX;
    }
    (1 << (width * 8)) - 1
}

/// Abstraction for values which can be written as big-endian bytes with a known size.
pub trait UnsignedEnum {
    /// Size of the unsigned enumeration in bytes.
    fn size(&self) -> usize;
    /// Write the unsigned enumeration to a raw buffer. Returns the written size on success.
    fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError>;

    fn value(&self) -> u64;

    #[cfg(feature = "alloc")]
    fn to_vec(&self) -> alloc::vec::Vec<u8> {
        let mut buf = alloc::vec![0; self.size()];
        self.write_to_be_bytes(&mut buf).unwrap();
        buf
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnsignedByteFieldError {
    #[error("value {value} too large for width {width}")]
    ValueTooLargeForWidth { width: usize, value: u64 },
    #[error("invalid width {found}, must be in the range 1..=8")]
    InvalidWidth { found: usize, expected: Option<usize> },
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
}

/// Type-erased big-endian unsigned integer field with an octet width between 0 and 8.
///
/// The CFDP PDU header serializes entity IDs and transaction sequence numbers with a
/// configurable width, so all widths expressible by the 3-bit length fields must round-trip,
/// not just the power-of-two ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnsignedByteField {
    width: usize,
    value: u64,
}

impl UnsignedByteField {
    #[inline]
    pub const fn new(width: usize, value: u64) -> Self {
        Self { width, value }
    }

    #[inline]
    pub const fn value_const(&self) -> u64 {
        self.value
    }

    #[inline]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Re-interpret the value with a different width. The value is masked to the new width.
    #[inline]
    pub const fn with_width(&self, width: usize) -> Self {
        Self::new(width, self.value & max_value_for_width(width))
    }

    pub fn new_from_be_bytes(width: usize, buf: &[u8]) -> Result<Self, UnsignedByteFieldError> {
        if width > 8 {
            return Err(UnsignedByteFieldError::InvalidWidth {
                found: width,
                expected: None,
            });
        }
        if width > buf.len() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: width,
            }
            .into());
        }
        let mut value = 0;
        for byte in &buf[0..width] {
            value = (value << 8) | u64::from(*byte);
        }
        Ok(Self::new(width, value))
    }
}

impl UnsignedEnum for UnsignedByteField {
    #[inline]
    fn size(&self) -> usize {
        self.width
    }

    #[inline]
    fn value(&self) -> u64 {
        self.value_const()
    }

    fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.width {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.width,
            });
        }
        for (idx, byte) in buf[0..self.width].iter_mut().enumerate() {
            *byte = (self.value >> (8 * (self.width - 1 - idx))) as u8;
        }
        Ok(self.width)
    }
}

/// Strongly typed variant of [UnsignedByteField] where the width is fixed by the value type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenericUnsignedByteField<TYPE: Copy + Into<u64>> {
    value: TYPE,
}

impl<TYPE: Copy + Into<u64>> GenericUnsignedByteField<TYPE> {
    pub const fn new(value: TYPE) -> Self {
        Self { value }
    }

    pub const fn value_typed(&self) -> TYPE {
        self.value
    }
}

impl<TYPE: Copy + Into<u64>> UnsignedEnum for GenericUnsignedByteField<TYPE> {
    #[inline]
    fn size(&self) -> usize {
        core::mem::size_of::<TYPE>()
    }

    fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        UnsignedByteField::new(self.size(), self.value.into()).write_to_be_bytes(buf)
    }

    #[inline]
    fn value(&self) -> u64 {
        self.value.into()
    }
}

pub type UnsignedByteFieldU8 = GenericUnsignedByteField<u8>;
pub type UnsignedByteFieldU16 = GenericUnsignedByteField<u16>;
pub type UnsignedByteFieldU32 = GenericUnsignedByteField<u32>;
pub type UnsignedByteFieldU64 = GenericUnsignedByteField<u64>;

pub type UbfU8 = UnsignedByteFieldU8;
pub type UbfU16 = UnsignedByteFieldU16;
pub type UbfU32 = UnsignedByteFieldU32;
pub type UbfU64 = UnsignedByteFieldU64;

macro_rules! typed_ubf_conversions {
    ($($ty:ty => $width:expr),+) => {
        $(
            impl From<GenericUnsignedByteField<$ty>> for UnsignedByteField {
                #[inline]
                fn from(value: GenericUnsignedByteField<$ty>) -> Self {
                    Self::new($width, value.value.into())
                }
            }

            impl TryFrom<UnsignedByteField> for GenericUnsignedByteField<$ty> {
                type Error = UnsignedByteFieldError;

                fn try_from(value: UnsignedByteField) -> Result<Self, Self::Error> {
                    if value.width != $width {
                        return Err(UnsignedByteFieldError::InvalidWidth {
                            found: value.width,
                            expected: Some($width),
                        });
                    }
                    Ok(Self::new(value.value as $ty))
                }
            }
        )+
    };
}

typed_ubf_conversions!(u8 => 1, u16 => 2, u32 => 4, u64 => 8);
