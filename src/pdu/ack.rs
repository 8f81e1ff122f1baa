//! ACK PDU support according to CFDP chapter 5.2.4.
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, CfdpPdu, ConditionCode, CrcFlag,
    Direction, FileDirectiveType, PduError, PduHeader, TransactionStatus, WritablePduPacket,
};
use crate::util::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// ACK PDU abstraction.
///
/// Only the EOF and Finished directives can be acknowledged. The directive subtype field is
/// fully determined by the acknowledged directive: 1 for Finished, 0 for EOF.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AckPdu {
    pdu_header: PduHeader,
    directive_code_of_acked_pdu: FileDirectiveType,
    condition_code: ConditionCode,
    transaction_status: TransactionStatus,
}

impl AckPdu {
    pub fn new(
        mut pdu_header: PduHeader,
        directive_code_of_acked_pdu: FileDirectiveType,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Result<Self, PduError> {
        if directive_code_of_acked_pdu == FileDirectiveType::EofPdu {
            // An ACK of EOF travels towards the file sender.
            pdu_header.pdu_conf.direction = Direction::TowardsSender;
        } else if directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        } else {
            return Err(PduError::InvalidDirectiveType {
                found: directive_code_of_acked_pdu as u8,
                expected: None,
            });
        }
        let mut ack_pdu = Self {
            pdu_header,
            directive_code_of_acked_pdu,
            condition_code,
            transaction_status,
        };
        ack_pdu.pdu_header.pdu_datafield_len = ack_pdu.calc_pdu_datafield_len() as u16;
        Ok(ack_pdu)
    }

    pub fn new_for_eof_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        // Unwrap okay, the directive type is valid here.
        Self::new(
            pdu_header,
            FileDirectiveType::EofPdu,
            condition_code,
            transaction_status,
        )
        .unwrap()
    }

    pub fn new_for_finished_pdu(
        pdu_header: PduHeader,
        condition_code: ConditionCode,
        transaction_status: TransactionStatus,
    ) -> Self {
        Self::new(
            pdu_header,
            FileDirectiveType::FinishedPdu,
            condition_code,
            transaction_status,
        )
        .unwrap()
    }

    #[inline]
    pub fn directive_code_of_acked_pdu(&self) -> FileDirectiveType {
        self.directive_code_of_acked_pdu
    }

    #[inline]
    pub fn condition_code(&self) -> ConditionCode {
        self.condition_code
    }

    #[inline]
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        let mut len = 3;
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes(buf: &[u8]) -> Result<AckPdu, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        generic_length_checks_pdu_deserialization(buf, current_idx + 3, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::AckPdu),
            }
        })?;
        if directive_type != FileDirectiveType::AckPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::AckPdu,
            });
        }
        current_idx += 1;
        let acked_directive = FileDirectiveType::try_from((buf[current_idx] >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidDirectiveType {
                found: (buf[current_idx] >> 4) & 0b1111,
                expected: None,
            })?;
        if acked_directive != FileDirectiveType::EofPdu
            && acked_directive != FileDirectiveType::FinishedPdu
        {
            return Err(PduError::InvalidDirectiveType {
                found: acked_directive as u8,
                expected: None,
            });
        }
        current_idx += 1;
        let condition_code = ConditionCode::try_from((buf[current_idx] >> 4) & 0b1111)
            .map_err(|_| PduError::InvalidConditionCode((buf[current_idx] >> 4) & 0b1111))?;
        // The conversion can not fail on a masked 2-bit value.
        let transaction_status = TransactionStatus::try_from(buf[current_idx] & 0b11).unwrap();
        Self::new(
            pdu_header,
            acked_directive,
            condition_code,
            transaction_status,
        )
    }
}

impl CfdpPdu for AckPdu {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::AckPdu)
    }
}

impl WritablePduPacket for AckPdu {
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
        buf[current_idx] = FileDirectiveType::AckPdu as u8;
        current_idx += 1;
        // The directive subtype is 1 for an acknowledged Finished PDU and 0 otherwise.
        let subtype = if self.directive_code_of_acked_pdu == FileDirectiveType::FinishedPdu {
            0b0001
        } else {
            0b0000
        };
        buf[current_idx] = ((self.directive_code_of_acked_pdu as u8) << 4) | subtype;
        current_idx += 1;
        buf[current_idx] =
            ((self.condition_code as u8) << 4) | (self.transaction_status as u8);
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
