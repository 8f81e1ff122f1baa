//! File Data PDU support according to CFDP chapter 5.3.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, read_fss_field, write_fss_field,
    CfdpPdu, CrcFlag, Direction, FileDirectiveType, PduError, PduHeader, PduType,
    SegmentMetadataFlag, WritablePduPacket,
};
use crate::util::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RecordContinuationState {
    NoStartNoEnd = 0b00,
    StartWithoutEnd = 0b01,
    EndWithoutStart = 0b10,
    StartAndEnd = 0b11,
}

/// Optional metadata block preceding the offset field of a File Data PDU.
///
/// The first octet carries the record continuation state in the top two bits and the metadata
/// length in the low six bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentMetadata<'seg_meta> {
    record_continuation_state: RecordContinuationState,
    metadata: &'seg_meta [u8],
}

pub const MAX_SEGMENT_METADATA_LEN: usize = 0b0011_1111;

impl<'seg_meta> SegmentMetadata<'seg_meta> {
    pub fn new(
        record_continuation_state: RecordContinuationState,
        metadata: &'seg_meta [u8],
    ) -> Option<Self> {
        if metadata.len() > MAX_SEGMENT_METADATA_LEN {
            return None;
        }
        Some(Self {
            record_continuation_state,
            metadata,
        })
    }

    #[inline]
    pub fn record_continuation_state(&self) -> RecordContinuationState {
        self.record_continuation_state
    }

    #[inline]
    pub fn metadata(&self) -> &'seg_meta [u8] {
        self.metadata
    }

    #[inline]
    pub fn written_len(&self) -> usize {
        1 + self.metadata.len()
    }

    pub(crate) fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.written_len() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.written_len(),
            });
        }
        buf[0] = ((self.record_continuation_state as u8) << 6) | (self.metadata.len() as u8);
        buf[1..1 + self.metadata.len()].copy_from_slice(self.metadata);
        Ok(self.written_len())
    }

    pub(crate) fn from_bytes(buf: &'seg_meta [u8]) -> Result<Self, ByteConversionError> {
        if buf.is_empty() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: 0,
                expected: 1,
            });
        }
        // The conversion can not fail on a masked 2-bit value.
        let record_continuation_state =
            RecordContinuationState::try_from((buf[0] >> 6) & 0b11).unwrap();
        let metadata_len = (buf[0] & 0b11_1111) as usize;
        if buf.len() < 1 + metadata_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: 1 + metadata_len,
            });
        }
        Ok(Self {
            record_continuation_state,
            metadata: &buf[1..1 + metadata_len],
        })
    }
}

/// File Data PDU abstraction.
///
/// This is a zero-copy abstraction which borrows the file data to send or which was received.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileDataPdu<'seg_meta, 'file_data> {
    pdu_header: PduHeader,
    #[cfg_attr(feature = "serde", serde(borrow))]
    segment_metadata: Option<SegmentMetadata<'seg_meta>>,
    offset: u64,
    file_data: &'file_data [u8],
}

impl<'seg_meta, 'file_data> FileDataPdu<'seg_meta, 'file_data> {
    pub fn new_with_seg_metadata(
        pdu_header: PduHeader,
        segment_metadata: SegmentMetadata<'seg_meta>,
        offset: u64,
        file_data: &'file_data [u8],
    ) -> Self {
        Self::new_generic(pdu_header, Some(segment_metadata), offset, file_data)
    }

    pub fn new_no_seg_metadata(
        pdu_header: PduHeader,
        offset: u64,
        file_data: &'file_data [u8],
    ) -> Self {
        Self::new_generic(pdu_header, None, offset, file_data)
    }

    pub fn new_generic(
        mut pdu_header: PduHeader,
        segment_metadata: Option<SegmentMetadata<'seg_meta>>,
        offset: u64,
        file_data: &'file_data [u8],
    ) -> Self {
        pdu_header.pdu_type = PduType::FileData;
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        pdu_header.seg_metadata_flag = if segment_metadata.is_some() {
            SegmentMetadataFlag::Present
        } else {
            SegmentMetadataFlag::NotPresent
        };
        let mut pdu = Self {
            pdu_header,
            segment_metadata,
            offset,
            file_data,
        };
        pdu.pdu_header.pdu_datafield_len = pdu.calc_pdu_datafield_len() as u16;
        pdu
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn file_data(&self) -> &'file_data [u8] {
        self.file_data
    }

    #[inline]
    pub fn segment_metadata(&self) -> Option<&SegmentMetadata<'seg_meta>> {
        self.segment_metadata.as_ref()
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = if self.pdu_header.pdu_conf.file_flag == super::LargeFileFlag::Large {
            8
        } else {
            4
        };
        if let Some(segment_metadata) = &self.segment_metadata {
            len += segment_metadata.written_len()
        }
        len += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes<'buf: 'seg_meta + 'file_data>(
        buf: &'buf [u8],
    ) -> Result<FileDataPdu<'seg_meta, 'file_data>, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let min_expected_len =
            current_idx + if pdu_header.pdu_conf.file_flag == super::LargeFileFlag::Large {
                8
            } else {
                4
            };
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let mut segment_metadata = None;
        if pdu_header.seg_metadata_flag == SegmentMetadataFlag::Present {
            let parsed = SegmentMetadata::from_bytes(&buf[current_idx..full_len_without_crc])?;
            current_idx += parsed.written_len();
            segment_metadata = Some(parsed);
        }
        let (fss_len, offset) =
            read_fss_field(pdu_header.pdu_conf.file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        if current_idx > full_len_without_crc {
            return Err(PduError::Format);
        }
        Ok(Self {
            pdu_header,
            segment_metadata,
            offset,
            file_data: &buf[current_idx..full_len_without_crc],
        })
    }
}

impl CfdpPdu for FileDataPdu<'_, '_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        None
    }
}

impl WritablePduPacket for FileDataPdu<'_, '_> {
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError> {
        let expected_len = self.len_written();
        if buf.len() < expected_len {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: expected_len,
            }
            .into());
        }
        let mut current_idx = self.pdu_header.write_to_bytes(buf)?;
        if let Some(segment_metadata) = &self.segment_metadata {
            current_idx += segment_metadata.write_to_bytes(&mut buf[current_idx..])?;
        }
        current_idx += write_fss_field(
            self.pdu_header.pdu_conf.file_flag,
            self.offset,
            &mut buf[current_idx..],
        )?;
        buf[current_idx..current_idx + self.file_data.len()].copy_from_slice(self.file_data);
        current_idx += self.file_data.len();
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}
