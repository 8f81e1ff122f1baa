//! EOF PDU support according to CFDP chapter 5.2.2.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, read_fss_field, write_fss_field,
    CfdpPdu, ConditionCode, CrcFlag, Direction, FileDirectiveType, LargeFileFlag, PduError,
    PduHeader, WritablePduPacket,
};
use crate::util::{ByteConversionError, UnsignedByteField, UnsignedEnum};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// EOF PDU abstraction.
///
/// The EOF PDU closes the sequence of File Data PDUs. It carries the file checksum and the
/// final file size. For faulty transfers, the entity which detected the fault can be appended
/// as a raw entity ID sized like the header entity ID fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EofPdu {
    pdu_header: PduHeader,
    condition_code: ConditionCode,
    file_checksum: u32,
    file_size: u64,
    fault_location: Option<UnsignedByteField>,
}

impl EofPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        condition_code: ConditionCode,
        file_checksum: u32,
        file_size: u64,
        fault_location: Option<UnsignedByteField>,
    ) -> Self {
        // Force correct direction flag.
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        let mut eof_pdu = Self {
            pdu_header,
            condition_code,
            file_checksum,
            file_size,
            fault_location,
        };
        eof_pdu.pdu_header.pdu_datafield_len = eof_pdu.calc_pdu_datafield_len() as u16;
        eof_pdu
    }

    pub fn new_no_error(pdu_header: PduHeader, file_checksum: u32, file_size: u64) -> Self {
        Self::new(
            pdu_header,
            ConditionCode::NoError,
            file_checksum,
            file_size,
            None,
        )
    }

    #[inline]
    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    #[inline]
    pub fn file_checksum(&self) -> u32 {
        self.file_checksum
    }

    #[inline]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[inline]
    pub fn fault_location(&self) -> Option<UnsignedByteField> {
        self.fault_location
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive type octet, one condition code octet, 4 checksum octets.
        let mut len = 2 + core::mem::size_of::<u32>() + 4;
        if self.pdu_header.pdu_conf.file_flag == LargeFileFlag::Large {
            len += 4;
        }
        if let Some(fault_location) = self.fault_location {
            len += fault_location.size();
        }
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<EofPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let mut min_expected_len = current_idx + 2 + 4 + 4;
        if pdu_header.pdu_conf.file_flag == LargeFileFlag::Large {
            min_expected_len += 4;
        }
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::EofPdu),
            }
        })?;
        if directive_type != FileDirectiveType::EofPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::EofPdu,
            });
        }
        current_idx += 1;
        let condition_code = ConditionCode::try_from((buf[current_idx] >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidConditionCode((buf[current_idx] >> 4) & 0b1111))?;
        current_idx += 1;
        let file_checksum =
            u32::from_be_bytes(buf[current_idx..current_idx + 4].try_into().unwrap());
        current_idx += 4;
        let (fss_field_len, file_size) =
            read_fss_field(pdu_header.pdu_conf.file_flag, &buf[current_idx..])?;
        current_idx += fss_field_len;
        let mut fault_location = None;
        let entity_id_len = pdu_header.pdu_conf.source_entity_id.size();
        if condition_code != ConditionCode::NoError
            && current_idx + entity_id_len <= full_len_without_crc
        {
            fault_location = Some(
                UnsignedByteField::new_from_be_bytes(entity_id_len, &buf[current_idx..])
                    .map_err(|_| PduError::Format)?,
            );
        }
        Ok(Self {
            pdu_header,
            condition_code,
            file_checksum,
            file_size,
            fault_location,
        })
    }
}

impl CfdpPdu for EofPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::EofPdu)
    }
}

impl WritablePduPacket for EofPdu {
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
        buf[current_idx] = FileDirectiveType::EofPdu as u8;
        current_idx += 1;
        buf[current_idx] = (self.condition_code as u8) << 4;
        current_idx += 1;
        buf[current_idx..current_idx + 4].copy_from_slice(&self.file_checksum.to_be_bytes());
        current_idx += 4;
        current_idx += write_fss_field(
            self.pdu_header.pdu_conf.file_flag,
            self.file_size,
            &mut buf[current_idx..],
        )?;
        if let Some(fault_location) = self.fault_location {
            current_idx += fault_location.write_to_be_bytes(&mut buf[current_idx..])?;
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
