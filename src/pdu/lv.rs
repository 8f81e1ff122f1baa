//! Length-value (LV) field support, used for the file name fields of the Metadata PDU.
use crate::util::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const MIN_LV_LEN: usize = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LvError {
    #[error("data with size {0} larger than allowed {max} bytes", max = u8::MAX)]
    DataTooLarge(usize),
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
}

/// Length-value field: one length octet followed by that many value bytes.
///
/// This is a zero-copy abstraction which borrows the value slice.
#[derive(Debug, Copy, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lv<'data> {
    data: &'data [u8],
}

impl PartialEq for Lv<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'data> Lv<'data> {
    pub fn new(data: &'data [u8]) -> Result<Lv<'data>, LvError> {
        if data.len() > u8::MAX as usize {
            return Err(LvError::DataTooLarge(data.len()));
        }
        Ok(Lv { data })
    }

    /// Creates a LV with an empty value field.
    pub const fn new_empty() -> Lv<'data> {
        Lv { data: &[] }
    }

    /// Helper function to build a string LV. This is especially useful for file names.
    pub fn new_from_str(str_slice: &'data str) -> Result<Lv<'data>, LvError> {
        Self::new(str_slice.as_bytes())
    }

    /// Returns the length of the value part, not including the length byte.
    #[inline]
    pub fn len_value(&self) -> usize {
        self.data.len()
    }

    /// Returns the full raw length, including the length byte.
    #[inline]
    pub fn len_full(&self) -> usize {
        self.len_value() + 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        self.data
    }

    /// Interpret the value as a string slice.
    pub fn value_as_str(&self) -> Option<Result<&'data str, core::str::Utf8Error>> {
        if self.is_empty() {
            return None;
        }
        Some(core::str::from_utf8(self.data))
    }

    /// Writes the LV to the given buffer. Returns the full written size on success.
    pub fn write_to_be_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.len_full() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.len_full(),
            });
        }
        buf[0] = self.data.len() as u8;
        buf[1..1 + self.data.len()].copy_from_slice(self.data);
        Ok(self.len_full())
    }

    /// Reads a LV from a raw buffer.
    pub fn from_be_bytes(buf: &'data [u8]) -> Result<Lv<'data>, ByteConversionError> {
        if buf.is_empty() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: 0,
                expected: MIN_LV_LEN,
            });
        }
        let value_len = buf[0] as usize;
        if buf.len() < MIN_LV_LEN + value_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: MIN_LV_LEN + value_len,
            });
        }
        Ok(Self {
            data: &buf[MIN_LV_LEN..MIN_LV_LEN + value_len],
        })
    }
}
