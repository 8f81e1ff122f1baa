//! NAK PDU support according to CFDP chapter 5.2.6.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, CrcFlag, Direction,
    FileDirectiveType, LargeFileFlag, PduError, PduHeader, WritablePduPacket,
};
use crate::util::ByteConversionError;

/// NAK PDU abstraction specialized in the creation of NAK PDUs.
///
/// The segment requests are passed as `(start offset, end offset)` pairs and are written with
/// 4 or 8 octets per offset depending on the large file flag of the PDU configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakPduCreator<'seg_reqs> {
    pdu_header: PduHeader,
    start_of_scope: u64,
    end_of_scope: u64,
    segment_requests: &'seg_reqs [(u64, u64)],
}

impl<'seg_reqs> NakPduCreator<'seg_reqs> {
    pub fn new(
        mut pdu_header: PduHeader,
        start_of_scope: u64,
        end_of_scope: u64,
        segment_requests: &'seg_reqs [(u64, u64)],
    ) -> Result<NakPduCreator<'seg_reqs>, PduError> {
        // Force correct direction flag.
        pdu_header.pdu_conf.direction = Direction::TowardsSender;
        if pdu_header.pdu_conf.file_flag == LargeFileFlag::Normal {
            let scope_check = |value: u64| {
                if value > u32::MAX as u64 {
                    return Err(PduError::FileSizeTooLarge(value));
                }
                Ok(())
            };
            scope_check(start_of_scope)?;
            scope_check(end_of_scope)?;
            for (start, end) in segment_requests {
                scope_check(*start)?;
                scope_check(*end)?;
            }
        }
        let mut nak_pdu = Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            segment_requests,
        };
        nak_pdu.pdu_header.pdu_datafield_len = nak_pdu.calc_pdu_datafield_len() as u16;
        Ok(nak_pdu)
    }

    #[inline]
    pub fn start_of_scope(&self) -> u64 {
        self.start_of_scope
    }

    #[inline]
    pub fn end_of_scope(&self) -> u64 {
        self.end_of_scope
    }

    #[inline]
    pub fn segment_requests(&self) -> &[(u64, u64)] {
        self.segment_requests
    }

    fn offset_width(&self) -> usize {
        if self.file_flag() == LargeFileFlag::Large {
            8
        } else {
            4
        }
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut datafield_len = 1 + (2 + 2 * self.segment_requests.len()) * self.offset_width();
        if self.crc_flag() == CrcFlag::WithCrc {
            datafield_len += 2;
        }
        datafield_len
    }

    fn write_offset(&self, buf: &mut [u8], current_idx: &mut usize, offset: u64) {
        if self.offset_width() == 8 {
            buf[*current_idx..*current_idx + 8].copy_from_slice(&offset.to_be_bytes());
            *current_idx += 8;
        } else {
            // The constructor checked the value range.
            buf[*current_idx..*current_idx + 4]
                .copy_from_slice(&(offset as u32).to_be_bytes());
            *current_idx += 4;
        }
    }
}

impl CfdpPdu for NakPduCreator<'_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::NakPdu)
    }
}

impl WritablePduPacket for NakPduCreator<'_> {
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
        buf[current_idx] = FileDirectiveType::NakPdu as u8;
        current_idx += 1;
        self.write_offset(buf, &mut current_idx, self.start_of_scope);
        self.write_offset(buf, &mut current_idx, self.end_of_scope);
        for (start, end) in self.segment_requests {
            self.write_offset(buf, &mut current_idx, *start);
            self.write_offset(buf, &mut current_idx, *end);
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}

/// NAK PDU abstraction specialized in reading NAK PDUs from a raw bytestream.
///
/// This is a zero-copy reader. The segment requests are exposed through an iterator which
/// normalizes both offset widths to [u64] pairs.
#[derive(Debug, PartialEq, Eq)]
pub struct NakPduReader<'seg_reqs> {
    pdu_header: PduHeader,
    start_of_scope: u64,
    end_of_scope: u64,
    seg_reqs_raw: &'seg_reqs [u8],
}

impl<'seg_reqs> NakPduReader<'seg_reqs> {
    pub fn new(buf: &'seg_reqs [u8]) -> Result<NakPduReader<'seg_reqs>, PduError> {
        Self::from_bytes(buf)
    }

    pub fn from_bytes(buf: &'seg_reqs [u8]) -> Result<NakPduReader<'seg_reqs>, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let offset_width = if pdu_header.pdu_conf.file_flag == LargeFileFlag::Large {
            8
        } else {
            4
        };
        // One directive octet plus start and end of scope.
        generic_length_checks_pdu_deserialization(
            buf,
            current_idx + 1 + 2 * offset_width,
            full_len_without_crc,
        )?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::NakPdu),
            }
        })?;
        if directive_type != FileDirectiveType::NakPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::NakPdu,
            });
        }
        current_idx += 1;
        let read_offset = |idx: &mut usize| {
            let offset = if offset_width == 8 {
                u64::from_be_bytes(buf[*idx..*idx + 8].try_into().unwrap())
            } else {
                u32::from_be_bytes(buf[*idx..*idx + 4].try_into().unwrap()) as u64
            };
            *idx += offset_width;
            offset
        };
        let start_of_scope = read_offset(&mut current_idx);
        let end_of_scope = read_offset(&mut current_idx);
        Ok(Self {
            pdu_header,
            start_of_scope,
            end_of_scope,
            seg_reqs_raw: &buf[current_idx..full_len_without_crc],
        })
    }

    #[inline]
    pub fn start_of_scope(&self) -> u64 {
        self.start_of_scope
    }

    #[inline]
    pub fn end_of_scope(&self) -> u64 {
        self.end_of_scope
    }

    pub fn num_segment_reqs(&self) -> usize {
        let pair_width = if self.file_flag() == LargeFileFlag::Large {
            16
        } else {
            8
        };
        self.seg_reqs_raw.len() / pair_width
    }

    /// Iterate over the segment requests. Iteration terminates when fewer than two offset
    /// fields remain in the data field.
    pub fn segment_requests_iter(&self) -> SegmentRequestIter<'seg_reqs> {
        SegmentRequestIter {
            seg_reqs_raw: self.seg_reqs_raw,
            offset_width: if self.file_flag() == LargeFileFlag::Large {
                8
            } else {
                4
            },
            current_idx: 0,
        }
    }
}

impl CfdpPdu for NakPduReader<'_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::NakPdu)
    }
}

/// Iterator over the segment requests of a [NakPduReader], normalized to [u64] pairs.
#[derive(Debug)]
pub struct SegmentRequestIter<'seg_reqs> {
    seg_reqs_raw: &'seg_reqs [u8],
    offset_width: usize,
    current_idx: usize,
}

impl Iterator for SegmentRequestIter<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx + 2 * self.offset_width > self.seg_reqs_raw.len() {
            return None;
        }
        let mut read_offset = || {
            let offset = if self.offset_width == 8 {
                u64::from_be_bytes(
                    self.seg_reqs_raw[self.current_idx..self.current_idx + 8]
                        .try_into()
                        .unwrap(),
                )
            } else {
                u32::from_be_bytes(
                    self.seg_reqs_raw[self.current_idx..self.current_idx + 4]
                        .try_into()
                        .unwrap(),
                ) as u64
            };
            self.current_idx += self.offset_width;
            offset
        };
        let start = read_offset();
        let end = read_offset();
        Some((start, end))
    }
}
