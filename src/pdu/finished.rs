//! Finished PDU support according to CFDP chapter 5.2.3.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, ConditionCode, CrcFlag,
    Direction, FileDirectiveType, PduError, PduHeader, WritablePduPacket,
};
use crate::util::ByteConversionError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// File status reported inside the Finished PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FileStatus {
    DiscardedDeliberately = 0b00,
    DiscardedFilestoreRejection = 0b01,
    RetainedSuccessfully = 0b10,
    Unreported = 0b11,
}

/// Finished PDU abstraction.
///
/// The receiving entity reports the outcome of a transaction with this PDU. The delivery code
/// flag is only set for transactions which completed without error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FinishedPdu {
    pdu_header: PduHeader,
    condition_code: ConditionCode,
    delivery_code: bool,
    file_status: FileStatus,
}

impl FinishedPdu {
    /// Finished PDU for a successful transfer.
    pub fn new_default(pdu_header: PduHeader, file_status: FileStatus) -> Self {
        Self::new_generic(pdu_header, ConditionCode::NoError, true, file_status)
    }

    pub fn new_with_error(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        file_status: FileStatus,
    ) -> Self {
        Self::new_generic(pdu_header, condition_code, false, file_status)
    }

    pub fn new_generic(
        mut pdu_header: PduHeader,
        condition_code: ConditionCode,
        delivery_code: bool,
        file_status: FileStatus,
    ) -> Self {
        // Force correct direction flag.
        pdu_header.pdu_conf.direction = Direction::TowardsSender;
        let mut finished_pdu = Self {
            pdu_header,
            condition_code,
            // The delivery code is only meaningful for error-free transactions.
            delivery_code: delivery_code && condition_code == ConditionCode::NoError,
            file_status,
        };
        finished_pdu.pdu_header.pdu_datafield_len =
            finished_pdu.calc_pdu_datafield_len() as u16;
        finished_pdu
    }

    #[inline]
    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    #[inline]
    pub fn delivery_code(&self) -> bool {
        self.delivery_code
    }

    #[inline]
    pub fn file_status(&self) -> FileStatus {
        self.file_status
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive type octet and one status octet.
        let mut len = 2;
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<FinishedPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        generic_length_checks_pdu_deserialization(buf, current_idx + 2, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::FinishedPdu),
            }
        })?;
        if directive_type != FileDirectiveType::FinishedPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::FinishedPdu,
            });
        }
        current_idx += 1;
        let status_byte = buf[current_idx];
        let condition_code = ConditionCode::try_from((status_byte >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidConditionCode((status_byte >> 4) & 0b1111))?;
        let delivery_code = (status_byte >> 2) & 0b1 == 1;
        // The conversion can not fail on a masked 2-bit value.
        let file_status = FileStatus::try_from(status_byte & 0b11).unwrap();
        Ok(Self {
            pdu_header,
            condition_code,
            delivery_code,
            file_status,
        })
    }
}

impl CfdpPdu for FinishedPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::FinishedPdu)
    }
}

impl WritablePduPacket for FinishedPdu {
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
        buf[current_idx] = FileDirectiveType::FinishedPdu as u8;
        current_idx += 1;
        buf[current_idx] = ((self.condition_code as u8) << 4)
            | ((self.delivery_code as u8) << 2)
            | (self.file_status as u8);
        current_idx += 1;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}
