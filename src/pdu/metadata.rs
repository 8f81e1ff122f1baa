//! Metadata PDU support according to CFDP chapter 5.2.5.
use crate::pdu::lv::Lv;
use crate::pdu::{
    add_pdu_crc, generic_length_checks_pdu_deserialization, read_fss_field, write_fss_field,
    CfdpPdu, ChecksumType, CrcFlag, Direction, FileDirectiveType, PduError, PduHeader,
    WritablePduPacket,
};
use crate::util::ByteConversionError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameter fields of the Metadata PDU which do not borrow the file name fields.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MetadataGenericParams {
    pub closure_requested: bool,
    pub checksum_type: ChecksumType,
    pub file_size: u64,
}

impl MetadataGenericParams {
    pub fn new(closure_requested: bool, checksum_type: ChecksumType, file_size: u64) -> Self {
        Self {
            closure_requested,
            checksum_type,
            file_size,
        }
    }
}

/// Metadata PDU abstraction.
///
/// The Metadata PDU opens a transaction. It carries the negotiated checksum type, the declared
/// file size, the closure request flag and the source and destination file names as LV fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetadataPdu<'src_name, 'dest_name> {
    pdu_header: PduHeader,
    metadata_params: MetadataGenericParams,
    #[cfg_attr(feature = "serde", serde(borrow))]
    src_file_name: Lv<'src_name>,
    #[cfg_attr(feature = "serde", serde(borrow))]
    dest_file_name: Lv<'dest_name>,
}

impl<'src_name, 'dest_name> MetadataPdu<'src_name, 'dest_name> {
    pub fn new(
        mut pdu_header: PduHeader,
        metadata_params: MetadataGenericParams,
        src_file_name: Lv<'src_name>,
        dest_file_name: Lv<'dest_name>,
    ) -> Self {
        // Force correct direction flag.
        pdu_header.pdu_conf.direction = Direction::TowardsReceiver;
        let mut metadata_pdu = Self {
            pdu_header,
            metadata_params,
            src_file_name,
            dest_file_name,
        };
        metadata_pdu.pdu_header.pdu_datafield_len =
            metadata_pdu.calc_pdu_datafield_len() as u16;
        metadata_pdu
    }

    #[inline]
    pub fn metadata_params(&self) -> &MetadataGenericParams {
        &self.metadata_params
    }

    #[inline]
    pub fn src_file_name(&self) -> Lv<'src_name> {
        self.src_file_name
    }

    #[inline]
    pub fn dest_file_name(&self) -> Lv<'dest_name> {
        self.dest_file_name
    }

    fn calc_pdu_datafield_len(&self) -> usize {
        // One directive type octet and one status octet.
        let mut len = 2;
        if self.pdu_header.pdu_conf.file_flag == super::LargeFileFlag::Large {
            len += 8;
        } else {
            len += 4;
        }
        len += self.src_file_name.len_full();
        len += self.dest_file_name.len_full();
        if self.crc_flag() == CrcFlag::WithCrc {
            len += 2;
        }
        len
    }

    pub fn from_bytes<'longest: 'src_name + 'dest_name>(
        buf: &'longest [u8],
    ) -> Result<MetadataPdu<'src_name, 'dest_name>, PduError> {
        let (pdu_header, mut current_idx) = PduHeader::from_bytes(buf)?;
        let full_len_without_crc = pdu_header.verify_length_and_checksum(buf)?;
        let mut min_expected_len = current_idx + 2 + 4 + 2;
        if pdu_header.pdu_conf.file_flag == super::LargeFileFlag::Large {
            min_expected_len += 4;
        }
        generic_length_checks_pdu_deserialization(buf, min_expected_len, full_len_without_crc)?;
        let directive_type = FileDirectiveType::try_from(buf[current_idx]).map_err(|_| {
            PduError::InvalidDirectiveType {
                found: buf[current_idx],
                expected: Some(FileDirectiveType::MetadataPdu),
            }
        })?;
        if directive_type != FileDirectiveType::MetadataPdu {
            return Err(PduError::WrongDirectiveType {
                found: directive_type,
                expected: FileDirectiveType::MetadataPdu,
            });
        }
        current_idx += 1;
        let status_byte = buf[current_idx];
        let closure_requested = (status_byte >> 6) & 0b1 == 1;
        let checksum_type = ChecksumType::try_from(status_byte & 0b1111)
            .map_err(|_| PduError::InvalidChecksumType(status_byte & 0b1111))?;
        current_idx += 1;
        let (fss_len, file_size) =
            read_fss_field(pdu_header.pdu_conf.file_flag, &buf[current_idx..])?;
        current_idx += fss_len;
        let src_file_name = Lv::from_be_bytes(&buf[current_idx..full_len_without_crc])?;
        current_idx += src_file_name.len_full();
        let dest_file_name = Lv::from_be_bytes(&buf[current_idx..full_len_without_crc])?;
        Ok(Self {
            pdu_header,
            metadata_params: MetadataGenericParams::new(
                closure_requested,
                checksum_type,
                file_size,
            ),
            src_file_name,
            dest_file_name,
        })
    }
}

impl CfdpPdu for MetadataPdu<'_, '_> {
    fn pdu_header(&self) -> &PduHeader {
        &self.pdu_header
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType> {
        Some(FileDirectiveType::MetadataPdu)
    }
}

impl WritablePduPacket for MetadataPdu<'_, '_> {
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
        buf[current_idx] = FileDirectiveType::MetadataPdu as u8;
        current_idx += 1;
        buf[current_idx] = ((self.metadata_params.closure_requested as u8) << 6)
            | (self.metadata_params.checksum_type as u8);
        current_idx += 1;
        current_idx += write_fss_field(
            self.pdu_header.pdu_conf.file_flag,
            self.metadata_params.file_size,
            &mut buf[current_idx..],
        )?;
        current_idx += self
            .src_file_name
            .write_to_be_bytes(&mut buf[current_idx..])?;
        current_idx += self
            .dest_file_name
            .write_to_be_bytes(&mut buf[current_idx..])?;
        if self.crc_flag() == CrcFlag::WithCrc {
            current_idx = add_pdu_crc(buf, current_idx);
        }
        Ok(current_idx)
    }

    fn len_written(&self) -> usize {
        self.pdu_header.pdu_len()
    }
}
