//! # Received Segment Store Module
//!
//! The [SegmentMap] keeps the file data segments received so far, keyed by their file offset.
//! The destination handler uses it to detect missing byte ranges for the NAK procedures and to
//! assemble the final file once all data arrived.
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum SegmentError {
    #[error("gap detected at offset {expected}, next segment starts at {found}")]
    GapDetected { expected: u64, found: u64 },
    #[error("segments cover {covered} bytes, expected file size {file_size}")]
    IncompleteData { covered: u64, file_size: u64 },
}

/// Offset-keyed ordered store of received file segments.
///
/// Iteration is always in ascending offset order. Inserting a segment at an offset which is
/// already present replaces the stored bytes.
#[derive(Debug, Default)]
pub struct SegmentMap {
    segments: BTreeMap<u64, Vec<u8>>,
}

impl SegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a segment. Returns the number of bytes which were stored at this offset before,
    /// if any.
    pub fn insert(&mut self, offset: u64, data: Vec<u8>) -> Option<usize> {
        self.segments.insert(offset, data).map(|old| old.len())
    }

    #[inline]
    pub fn number_of_segments(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.segments.clear();
    }

    /// Iterate over all stored segments in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        self.segments
            .iter()
            .map(|(offset, data)| (*offset, data.as_slice()))
    }

    /// Enumerate the byte ranges missing to cover `[0, file_size)` as `(start, end)` pairs with
    /// an exclusive end offset.
    pub fn gaps(&self, file_size: u64) -> Vec<(u64, u64)> {
        let mut gap_list = Vec::new();
        let mut expected = 0;
        for (offset, data) in &self.segments {
            if *offset > expected {
                gap_list.push((expected, *offset));
            }
            expected = offset + data.len() as u64;
        }
        if expected < file_size {
            gap_list.push((expected, file_size));
        }
        gap_list
    }

    /// Attempt to assemble all segments into one contiguous `file_size` sized buffer.
    ///
    /// This only succeeds if each segment starts exactly where the previous one ended and the
    /// segments cover the full file size.
    pub fn assemble(&self, file_size: u64) -> Result<Vec<u8>, SegmentError> {
        let mut assembled = Vec::with_capacity(file_size as usize);
        let mut expected = 0;
        for (offset, data) in &self.segments {
            if *offset != expected {
                return Err(SegmentError::GapDetected {
                    expected,
                    found: *offset,
                });
            }
            assembled.extend_from_slice(data);
            expected = offset + data.len() as u64;
        }
        if expected != file_size {
            return Err(SegmentError::IncompleteData {
                covered: expected,
                file_size,
            });
        }
        Ok(assembled)
    }
}
