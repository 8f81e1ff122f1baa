//! CFDP Packet Data Unit (PDU) support.
//!
//! The common PDU header lives here together with the wire-level enumerations shared by all
//! PDU types. The directive specific codecs live in the submodules.
use crate::util::{ByteConversionError, UnsignedByteField, UnsignedEnum};
use crc::{Crc, CRC_16_IBM_3740};
use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub mod ack;
pub mod eof;
pub mod file_data;
pub mod finished;
pub mod keep_alive;
pub mod lv;
pub mod metadata;
pub mod nak;
pub mod prompt;

/// This is the version of the standard this codec is based on, CCSDS 727.0-B-5.
pub const CFDP_VERSION_2: u8 = 0b001;

/// [Crc] instance used for the optional 16-bit PDU trailer checksum selected by the CRC flag
/// of the PDU header.
pub const CRC_CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PduType {
    FileDirective = 0,
    FileData = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Direction {
    TowardsReceiver = 0,
    TowardsSender = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransmissionMode {
    /// Class 2 transfer with lost segment detection and retransmission.
    Acknowledged = 0,
    /// Class 1 best-effort transfer.
    Unacknowledged = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CrcFlag {
    NoCrc = 0,
    WithCrc = 1,
}

impl From<bool> for CrcFlag {
    fn from(value: bool) -> Self {
        if value {
            return CrcFlag::WithCrc;
        }
        CrcFlag::NoCrc
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LargeFileFlag {
    /// 32 bit file size and file offset fields.
    Normal = 0,
    /// 64 bit file size and file offset fields.
    Large = 1,
}

/// Always 0 and ignored for file directive PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SegmentMetadataFlag {
    NotPresent = 0,
    Present = 1,
}

/// Always 0 and ignored for file directive PDUs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SegmentationControl {
    NoRecordBoundaryPreservation = 0,
    WithRecordBoundaryPreservation = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConditionCode {
    /// This is not an error condition.
    NoError = 0b0000,
    PositiveAckLimitReached = 0b0001,
    KeepAliveLimitReached = 0b0010,
    InvalidTransmissionMode = 0b0011,
    FilestoreRejection = 0b0100,
    FileChecksumFailure = 0b0101,
    FileSizeError = 0b0110,
    NakLimitReached = 0b0111,
    InactivityDetected = 0b1000,
    InvalidFileStructure = 0b1001,
    CheckLimitReached = 0b1010,
    UnsupportedChecksumType = 0b1011,
    SuspendRequestReceived = 0b1110,
    CancelRequestReceived = 0b1111,
}

/// Transaction status for the ACK PDU field according to chapter 5.2.4 of the CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransactionStatus {
    /// Transaction is not currently active and the entity does not retain a transaction history.
    Undefined = 0b00,
    Active = 0b01,
    /// Transaction was active in the past and was terminated.
    Terminated = 0b10,
    Unrecognized = 0b11,
}

/// Checksum types negotiated through the Metadata PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChecksumType {
    /// Modular legacy checksum.
    Modular = 0,
    /// Polynomial 0xEDB88320, reflected, initial and final value 0xFFFFFFFF.
    Crc32 = 1,
    Crc32C = 2,
    /// Skips the verification on the receiving side.
    NullChecksum = 15,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::NullChecksum
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FileDirectiveType {
    EofPdu = 0x04,
    FinishedPdu = 0x05,
    AckPdu = 0x06,
    MetadataPdu = 0x07,
    NakPdu = 0x08,
    PromptPdu = 0x09,
    KeepAlivePdu = 0x0c,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduError {
    #[error("byte conversion error: {0}")]
    ByteConversion(#[from] ByteConversionError),
    /// Found version ID invalid, not equal to [CFDP_VERSION_2].
    #[error("CFDP version mismatch, found {0}, expected {ver}", ver = CFDP_VERSION_2)]
    CfdpVersionMismatch(u8),
    #[error("mismatch of PDU source ID length {src_id_len} and destination ID length {dest_id_len}")]
    SourceDestIdLenMismatch {
        src_id_len: usize,
        dest_id_len: usize,
    },
    /// Invalid width for an entity ID or sequence number field, only 1..=8 are possible.
    #[error("invalid length {0} for a variable width header field")]
    InvalidFieldWidth(usize),
    /// Wrong directive type, for example when parsing the directive field for a file directive
    /// PDU.
    #[error("wrong directive type, found {found:?}, expected {expected:?}")]
    WrongDirectiveType {
        found: FileDirectiveType,
        expected: FileDirectiveType,
    },
    /// The directive type field contained a value not in the range of permitted values.
    #[error("invalid directive type, found {found:?}, expected {expected:?}")]
    InvalidDirectiveType {
        found: u8,
        expected: Option<FileDirectiveType>,
    },
    /// Invalid condition code. Contains the raw detected value.
    #[error("invalid condition code {0}")]
    InvalidConditionCode(u8),
    /// Invalid checksum type in a Metadata PDU.
    #[error("invalid checksum type {0}")]
    InvalidChecksumType(u8),
    #[error("file size {0} too large for the normal file size field")]
    FileSizeTooLarge(u64),
    /// The 16-bit trailer checksum check failed. Contains the raw detected CRC value.
    #[error("PDU checksum error for checksum {0}")]
    Checksum(u16),
    /// Generic error for invalid PDU formats.
    #[error("generic PDU format error")]
    Format,
}

pub trait WritablePduPacket {
    fn len_written(&self) -> usize;
    fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, PduError>;

    #[cfg(feature = "alloc")]
    fn to_vec(&self) -> Result<Vec<u8>, PduError> {
        let mut vec = alloc::vec![0; self.len_written()];
        self.write_to_bytes(&mut vec)?;
        Ok(vec)
    }
}

/// Abstraction trait for fields and properties common for all PDUs.
pub trait CfdpPdu {
    fn pdu_header(&self) -> &PduHeader;

    #[inline]
    fn source_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().source_entity_id
    }

    #[inline]
    fn dest_id(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().dest_entity_id
    }

    #[inline]
    fn transaction_seq_num(&self) -> UnsignedByteField {
        self.pdu_header().common_pdu_conf().transaction_seq_num
    }

    #[inline]
    fn transmission_mode(&self) -> TransmissionMode {
        self.pdu_header().common_pdu_conf().trans_mode
    }

    #[inline]
    fn direction(&self) -> Direction {
        self.pdu_header().common_pdu_conf().direction
    }

    #[inline]
    fn crc_flag(&self) -> CrcFlag {
        self.pdu_header().common_pdu_conf().crc_flag
    }

    #[inline]
    fn file_flag(&self) -> LargeFileFlag {
        self.pdu_header().common_pdu_conf().file_flag
    }

    #[inline]
    fn pdu_type(&self) -> PduType {
        self.pdu_header().pdu_type()
    }

    fn file_directive_type(&self) -> Option<FileDirectiveType>;
}

/// Common configuration fields for a PDU.
///
/// Please note that this structure has a custom implementation of [PartialEq] which compares
/// the entity ID and sequence number fields by value only. This permits those fields to have
/// different widths, as long as the value is the same.
#[derive(Debug, Copy, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommonPduConfig {
    source_entity_id: UnsignedByteField,
    dest_entity_id: UnsignedByteField,
    pub transaction_seq_num: UnsignedByteField,
    pub trans_mode: TransmissionMode,
    pub file_flag: LargeFileFlag,
    pub crc_flag: CrcFlag,
    pub direction: Direction,
}

impl CommonPduConfig {
    pub fn new(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
        transaction_seq_num: impl Into<UnsignedByteField>,
        trans_mode: TransmissionMode,
        file_flag: LargeFileFlag,
        crc_flag: CrcFlag,
        direction: Direction,
    ) -> Result<Self, PduError> {
        let (source_id, dest_id) = Self::source_dest_id_check(source_id, dest_id)?;
        let transaction_seq_num = transaction_seq_num.into();
        if transaction_seq_num.size() < 1 || transaction_seq_num.size() > 8 {
            return Err(PduError::InvalidFieldWidth(transaction_seq_num.size()));
        }
        Ok(Self {
            source_entity_id: source_id,
            dest_entity_id: dest_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        })
    }

    pub fn new_with_byte_fields(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
        transaction_seq_num: impl Into<UnsignedByteField>,
    ) -> Result<Self, PduError> {
        Self::new(
            source_id,
            dest_id,
            transaction_seq_num,
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
    }

    #[inline]
    pub fn source_id(&self) -> UnsignedByteField {
        self.source_entity_id
    }

    #[inline]
    pub fn dest_id(&self) -> UnsignedByteField {
        self.dest_entity_id
    }

    fn source_dest_id_check(
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
    ) -> Result<(UnsignedByteField, UnsignedByteField), PduError> {
        let source_id = source_id.into();
        let dest_id = dest_id.into();
        if source_id.size() != dest_id.size() {
            return Err(PduError::SourceDestIdLenMismatch {
                src_id_len: source_id.size(),
                dest_id_len: dest_id.size(),
            });
        }
        if source_id.size() < 1 || source_id.size() > 8 {
            return Err(PduError::InvalidFieldWidth(source_id.size()));
        }
        Ok((source_id, dest_id))
    }

    pub fn set_source_and_dest_id(
        &mut self,
        source_id: impl Into<UnsignedByteField>,
        dest_id: impl Into<UnsignedByteField>,
    ) -> Result<(), PduError> {
        let (source_id, dest_id) = Self::source_dest_id_check(source_id, dest_id)?;
        self.source_entity_id = source_id;
        self.dest_entity_id = dest_id;
        Ok(())
    }
}

impl Default for CommonPduConfig {
    /// The default uses 1-byte fields with the value 0 for the source ID, destination ID and
    /// the transaction sequence number.
    fn default() -> Self {
        // The new function can not fail for these input parameters.
        Self::new(
            UnsignedByteField::new(1, 0),
            UnsignedByteField::new(1, 0),
            UnsignedByteField::new(1, 0),
            TransmissionMode::Acknowledged,
            LargeFileFlag::Normal,
            CrcFlag::NoCrc,
            Direction::TowardsReceiver,
        )
        .unwrap()
    }
}

impl PartialEq for CommonPduConfig {
    fn eq(&self, other: &Self) -> bool {
        self.source_entity_id.value() == other.source_entity_id.value()
            && self.dest_entity_id.value() == other.dest_entity_id.value()
            && self.transaction_seq_num.value() == other.transaction_seq_num.value()
            && self.trans_mode == other.trans_mode
            && self.file_flag == other.file_flag
            && self.crc_flag == other.crc_flag
            && self.direction == other.direction
    }
}

pub const FIXED_HEADER_LEN: usize = 4;

/// Abstraction for the PDU header common to all CFDP PDUs.
///
/// For detailed information, refer to chapter 5.1 of the CFDP standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PduHeader {
    pdu_type: PduType,
    pdu_conf: CommonPduConfig,
    seg_metadata_flag: SegmentMetadataFlag,
    seg_ctrl: SegmentationControl,
    pdu_datafield_len: u16,
}

impl PduHeader {
    pub const FIXED_LEN: usize = FIXED_HEADER_LEN;

    #[inline]
    pub fn new_for_file_data(
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self::new_generic(
            PduType::FileData,
            pdu_conf,
            pdu_datafield_len,
            seg_metadata_flag,
            seg_ctrl,
        )
    }

    #[inline]
    pub fn new_for_file_data_default(pdu_conf: CommonPduConfig, pdu_datafield_len: u16) -> Self {
        Self::new_generic(
            PduType::FileData,
            pdu_conf,
            pdu_datafield_len,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    #[inline]
    pub fn new_for_file_directive(pdu_conf: CommonPduConfig, pdu_datafield_len: u16) -> Self {
        Self::new_generic(
            PduType::FileDirective,
            pdu_conf,
            pdu_datafield_len,
            SegmentMetadataFlag::NotPresent,
            SegmentationControl::NoRecordBoundaryPreservation,
        )
    }

    #[inline]
    pub fn new_generic(
        pdu_type: PduType,
        pdu_conf: CommonPduConfig,
        pdu_datafield_len: u16,
        seg_metadata_flag: SegmentMetadataFlag,
        seg_ctrl: SegmentationControl,
    ) -> Self {
        Self {
            pdu_type,
            pdu_conf,
            seg_metadata_flag,
            seg_ctrl,
            pdu_datafield_len,
        }
    }

    /// Returns only the length of the PDU header when written to a raw buffer.
    #[inline]
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_LEN
            + self.pdu_conf.source_entity_id.size()
            + self.pdu_conf.transaction_seq_num.size()
            + self.pdu_conf.dest_entity_id.size()
    }

    #[inline]
    pub fn pdu_datafield_len(&self) -> usize {
        self.pdu_datafield_len.into()
    }

    /// Returns the full length of the PDU when written to a raw buffer, which is the header
    /// length plus the PDU datafield length.
    #[inline]
    pub fn pdu_len(&self) -> usize {
        self.header_len() + self.pdu_datafield_len as usize
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<usize, ByteConversionError> {
        if buf.len() < self.header_len() {
            return Err(ByteConversionError::ToSliceTooSmall {
                found: buf.len(),
                expected: self.header_len(),
            });
        }
        let mut current_idx = 0;
        buf[current_idx] = (CFDP_VERSION_2 << 5)
            | ((self.pdu_type as u8) << 4)
            | ((self.pdu_conf.direction as u8) << 3)
            | ((self.pdu_conf.trans_mode as u8) << 2)
            | ((self.pdu_conf.crc_flag as u8) << 1)
            | (self.pdu_conf.file_flag as u8);
        current_idx += 1;
        buf[current_idx..current_idx + 2].copy_from_slice(&self.pdu_datafield_len.to_be_bytes());
        current_idx += 2;
        buf[current_idx] = ((self.seg_ctrl as u8) << 7)
            | (((self.pdu_conf.source_entity_id.size() - 1) as u8) << 4)
            | ((self.seg_metadata_flag as u8) << 3)
            | ((self.pdu_conf.transaction_seq_num.size() - 1) as u8);
        current_idx += 1;
        current_idx += self
            .pdu_conf
            .source_entity_id
            .write_to_be_bytes(&mut buf[current_idx..])?;
        current_idx += self
            .pdu_conf
            .transaction_seq_num
            .write_to_be_bytes(&mut buf[current_idx..])?;
        current_idx += self
            .pdu_conf
            .dest_entity_id
            .write_to_be_bytes(&mut buf[current_idx..])?;
        Ok(current_idx)
    }

    /// This function first verifies that the buffer can hold the full length of the PDU parsed
    /// from the header. Then, it verifies the trailer checksum if the CRC flag of the PDU
    /// header is set.
    ///
    /// Returns the PDU length excluding the 2 CRC bytes on success. If the CRC flag is not set,
    /// it simply returns the PDU length.
    pub fn verify_length_and_checksum(&self, buf: &[u8]) -> Result<usize, PduError> {
        if buf.len() < self.pdu_len() {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: self.pdu_len(),
            }
            .into());
        }
        if self.pdu_conf.crc_flag == CrcFlag::WithCrc {
            let mut digest = CRC_CCITT_FALSE.digest();
            digest.update(&buf[..self.pdu_len()]);
            if digest.finalize() != 0 {
                return Err(PduError::Checksum(u16::from_be_bytes(
                    buf[self.pdu_len() - 2..self.pdu_len()].try_into().unwrap(),
                )));
            }
            return Ok(self.pdu_len() - 2);
        }
        Ok(self.pdu_len())
    }

    /// Please note that this function will not verify that the passed buffer can hold the full
    /// PDU length. This allows recovering the header portion even if the data field length is
    /// invalid. The full length and trailer checksum can be verified with
    /// [Self::verify_length_and_checksum].
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), PduError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(PduError::ByteConversion(
                ByteConversionError::FromSliceTooSmall {
                    found: buf.len(),
                    expected: FIXED_HEADER_LEN,
                },
            ));
        }
        let cfdp_version_raw = (buf[0] >> 5) & 0b111;
        if cfdp_version_raw != CFDP_VERSION_2 {
            return Err(PduError::CfdpVersionMismatch(cfdp_version_raw));
        }
        // Unwrap for single bit fields: the conversion can not fail on a masked value.
        let pdu_type = PduType::try_from((buf[0] >> 4) & 0b1).unwrap();
        let direction = Direction::try_from((buf[0] >> 3) & 0b1).unwrap();
        let trans_mode = TransmissionMode::try_from((buf[0] >> 2) & 0b1).unwrap();
        let crc_flag = CrcFlag::try_from((buf[0] >> 1) & 0b1).unwrap();
        let file_flag = LargeFileFlag::try_from(buf[0] & 0b1).unwrap();
        let pdu_datafield_len = u16::from_be_bytes(buf[1..3].try_into().unwrap());
        let seg_ctrl = SegmentationControl::try_from((buf[3] >> 7) & 0b1).unwrap();
        // The stored-as-value-minus-one encoding makes every raw 3-bit value a valid width.
        let entity_id_len = (((buf[3] >> 4) & 0b111) + 1) as usize;
        let seg_metadata_flag = SegmentMetadataFlag::try_from((buf[3] >> 3) & 0b1).unwrap();
        let seq_num_len = ((buf[3] & 0b111) + 1) as usize;
        if buf.len() < FIXED_HEADER_LEN + 2 * entity_id_len + seq_num_len {
            return Err(ByteConversionError::FromSliceTooSmall {
                found: buf.len(),
                expected: FIXED_HEADER_LEN + 2 * entity_id_len + seq_num_len,
            }
            .into());
        }
        let mut current_idx = FIXED_HEADER_LEN;
        // Unwrapping is okay here because the width and the remaining buffer length were
        // checked above.
        let source_id =
            UnsignedByteField::new_from_be_bytes(entity_id_len, &buf[current_idx..]).unwrap();
        current_idx += entity_id_len;
        let transaction_seq_num =
            UnsignedByteField::new_from_be_bytes(seq_num_len, &buf[current_idx..]).unwrap();
        current_idx += seq_num_len;
        let dest_id =
            UnsignedByteField::new_from_be_bytes(entity_id_len, &buf[current_idx..]).unwrap();
        current_idx += entity_id_len;
        let common_pdu_conf = CommonPduConfig::new(
            source_id,
            dest_id,
            transaction_seq_num,
            trans_mode,
            file_flag,
            crc_flag,
            direction,
        )
        .unwrap();
        Ok((
            PduHeader {
                pdu_type,
                pdu_conf: common_pdu_conf,
                seg_metadata_flag,
                seg_ctrl,
                pdu_datafield_len,
            },
            current_idx,
        ))
    }

    #[inline]
    pub fn pdu_type(&self) -> PduType {
        self.pdu_type
    }

    #[inline]
    pub fn common_pdu_conf(&self) -> &CommonPduConfig {
        &self.pdu_conf
    }

    #[inline]
    pub fn seg_metadata_flag(&self) -> SegmentMetadataFlag {
        self.seg_metadata_flag
    }

    #[inline]
    pub fn seg_ctrl(&self) -> SegmentationControl {
        self.seg_ctrl
    }

    #[inline]
    pub(crate) fn set_pdu_datafield_len(&mut self, len: u16) {
        self.pdu_datafield_len = len;
    }
}

/// Write a file size or file offset field sized by the large file flag.
pub(crate) fn write_fss_field(
    file_flag: LargeFileFlag,
    file_size: u64,
    buf: &mut [u8],
) -> Result<usize, PduError> {
    Ok(if file_flag == LargeFileFlag::Large {
        buf[..core::mem::size_of::<u64>()].copy_from_slice(&file_size.to_be_bytes());
        core::mem::size_of::<u64>()
    } else {
        if file_size > u32::MAX as u64 {
            return Err(PduError::FileSizeTooLarge(file_size));
        }
        buf[..core::mem::size_of::<u32>()].copy_from_slice(&(file_size as u32).to_be_bytes());
        core::mem::size_of::<u32>()
    })
}

/// Read a file size or file offset field sized by the large file flag.
pub(crate) fn read_fss_field(
    file_flag: LargeFileFlag,
    buf: &[u8],
) -> Result<(usize, u64), ByteConversionError> {
    let fss_len = if file_flag == LargeFileFlag::Large {
        core::mem::size_of::<u64>()
    } else {
        core::mem::size_of::<u32>()
    };
    if buf.len() < fss_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: fss_len,
        });
    }
    if file_flag == LargeFileFlag::Large {
        Ok((fss_len, u64::from_be_bytes(buf[..8].try_into().unwrap())))
    } else {
        Ok((
            fss_len,
            u32::from_be_bytes(buf[..4].try_into().unwrap()).into(),
        ))
    }
}

// This is a generic length check applicable to most PDU deserializations. It first checks
// whether a given buffer can hold an expected minimum size, and then it checks whether the PDU
// datafield length is larger than that expected minimum size.
pub(crate) fn generic_length_checks_pdu_deserialization(
    buf: &[u8],
    min_expected_len: usize,
    full_len_without_crc: usize,
) -> Result<(), ByteConversionError> {
    if buf.len() < min_expected_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: buf.len(),
            expected: min_expected_len,
        });
    }
    // This can happen if the PDU datafield length value is invalid.
    if full_len_without_crc < min_expected_len {
        return Err(ByteConversionError::FromSliceTooSmall {
            found: full_len_without_crc,
            expected: min_expected_len,
        });
    }
    Ok(())
}

pub(crate) fn add_pdu_crc(buf: &mut [u8], mut current_idx: usize) -> usize {
    let mut digest = CRC_CCITT_FALSE.digest();
    digest.update(&buf[..current_idx]);
    buf[current_idx..current_idx + 2].copy_from_slice(&digest.finalize().to_be_bytes());
    current_idx += 2;
    current_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{UbfU16, UbfU8, UnsignedByteFieldU8};

    pub(crate) const TEST_SRC_ID: UbfU8 = UbfU8::new(5);
    pub(crate) const TEST_DEST_ID: UbfU8 = UbfU8::new(10);
    pub(crate) const TEST_SEQ_NUM: UbfU8 = UbfU8::new(20);

    pub(crate) fn common_pdu_conf(crc_flag: CrcFlag, fss: LargeFileFlag) -> CommonPduConfig {
        let mut pdu_conf =
            CommonPduConfig::new_with_byte_fields(TEST_SRC_ID, TEST_DEST_ID, TEST_SEQ_NUM)
                .expect("generating common PDU config failed");
        pdu_conf.crc_flag = crc_flag;
        pdu_conf.file_flag = fss;
        pdu_conf
    }

    pub(crate) fn verify_raw_header(pdu_header: &PduHeader, buf: &[u8]) {
        assert_eq!((buf[0] >> 5) & 0b111, CFDP_VERSION_2);
        assert_eq!((buf[0] >> 4) & 1, pdu_header.pdu_type as u8);
        assert_eq!((buf[0] >> 3) & 1, pdu_header.pdu_conf.direction as u8);
        assert_eq!((buf[0] >> 2) & 1, pdu_header.pdu_conf.trans_mode as u8);
        assert_eq!((buf[0] >> 1) & 1, pdu_header.pdu_conf.crc_flag as u8);
        assert_eq!(buf[0] & 1, pdu_header.pdu_conf.file_flag as u8);
        assert_eq!(
            u16::from_be_bytes(buf[1..3].try_into().unwrap()),
            pdu_header.pdu_datafield_len
        );
        assert_eq!((buf[3] >> 7) & 1, pdu_header.seg_ctrl as u8);
        assert_eq!(
            (((buf[3] >> 4) & 0b111) + 1) as usize,
            pdu_header.pdu_conf.source_entity_id.size()
        );
        assert_eq!((buf[3] >> 3) & 1, pdu_header.seg_metadata_flag as u8);
        assert_eq!(
            ((buf[3] & 0b111) + 1) as usize,
            pdu_header.pdu_conf.transaction_seq_num.size()
        );
    }

    #[test]
    fn test_header_basic_state() {
        let pdu_conf = common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let pdu_header = PduHeader::new_for_file_directive(pdu_conf, 5);
        assert_eq!(pdu_header.header_len(), 7);
        assert_eq!(pdu_header.pdu_datafield_len(), 5);
        assert_eq!(pdu_header.pdu_len(), 12);
        assert_eq!(pdu_header.pdu_type(), PduType::FileDirective);
    }

    #[test]
    fn test_header_round_trip() {
        let pdu_conf = common_pdu_conf(CrcFlag::NoCrc, LargeFileFlag::Normal);
        let pdu_header = PduHeader::new_for_file_directive(pdu_conf, 5);
        let mut buf: [u8; 32] = [0; 32];
        let written = pdu_header.write_to_bytes(&mut buf).unwrap();
        assert_eq!(written, pdu_header.header_len());
        verify_raw_header(&pdu_header, &buf);
        let (read_back, header_len) = PduHeader::from_bytes(&buf).unwrap();
        assert_eq!(header_len, written);
        assert_eq!(read_back, pdu_header);
    }

    #[test]
    fn test_header_round_trip_all_widths() {
        for id_width in 1..=8_usize {
            for seq_width in 1..=8_usize {
                let pdu_conf = CommonPduConfig::new_with_byte_fields(
                    UnsignedByteField::new(id_width, 1),
                    UnsignedByteField::new(id_width, 2),
                    UnsignedByteField::new(seq_width, 3),
                )
                .unwrap();
                let pdu_header = PduHeader::new_for_file_directive(pdu_conf, 0);
                assert_eq!(pdu_header.header_len(), 4 + 2 * id_width + seq_width);
                let mut buf: [u8; 32] = [0; 32];
                let written = pdu_header.write_to_bytes(&mut buf).unwrap();
                let (read_back, header_len) = PduHeader::from_bytes(&buf).unwrap();
                assert_eq!(header_len, written);
                assert_eq!(read_back, pdu_header);
            }
        }
    }

    #[test]
    fn test_header_decode_too_short() {
        let buf: [u8; 3] = [0; 3];
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        assert_eq!(
            error,
            PduError::ByteConversion(ByteConversionError::FromSliceTooSmall {
                found: 3,
                expected: FIXED_HEADER_LEN
            })
        );
    }

    #[test]
    fn test_header_decode_variable_part_too_short() {
        let pdu_conf = CommonPduConfig::new_with_byte_fields(
            UbfU16::new(1),
            UbfU16::new(2),
            UbfU16::new(3),
        )
        .unwrap();
        let pdu_header = PduHeader::new_for_file_directive(pdu_conf, 0);
        let mut buf: [u8; 32] = [0; 32];
        pdu_header.write_to_bytes(&mut buf).unwrap();
        let error = PduHeader::from_bytes(&buf[0..6]).unwrap_err();
        assert_eq!(
            error,
            PduError::ByteConversion(ByteConversionError::FromSliceTooSmall {
                found: 6,
                expected: 10
            })
        );
    }

    #[test]
    fn test_header_invalid_version() {
        let mut buf: [u8; 8] = [0; 8];
        buf[0] = 0b1110_0000;
        let error = PduHeader::from_bytes(&buf).unwrap_err();
        assert_eq!(error, PduError::CfdpVersionMismatch(0b111));
    }

    #[test]
    fn test_invalid_seq_num_width() {
        let result = CommonPduConfig::new_with_byte_fields(
            UnsignedByteFieldU8::new(1),
            UnsignedByteFieldU8::new(2),
            UnsignedByteField::new(9, 3),
        );
        assert_eq!(result.unwrap_err(), PduError::InvalidFieldWidth(9));
    }

    #[test]
    fn test_source_dest_width_mismatch() {
        let result = CommonPduConfig::new_with_byte_fields(
            UnsignedByteFieldU8::new(1),
            UbfU16::new(2),
            UnsignedByteFieldU8::new(3),
        );
        assert_eq!(
            result.unwrap_err(),
            PduError::SourceDestIdLenMismatch {
                src_id_len: 1,
                dest_id_len: 2
            }
        );
    }

    #[test]
    fn test_fss_field_round_trip() {
        let mut buf: [u8; 8] = [0; 8];
        assert_eq!(
            write_fss_field(LargeFileFlag::Normal, 10, &mut buf).unwrap(),
            4
        );
        assert_eq!(read_fss_field(LargeFileFlag::Normal, &buf).unwrap(), (4, 10));
        assert_eq!(
            write_fss_field(LargeFileFlag::Large, u32::MAX as u64 + 1, &mut buf).unwrap(),
            8
        );
        assert_eq!(
            read_fss_field(LargeFileFlag::Large, &buf).unwrap(),
            (8, u32::MAX as u64 + 1)
        );
    }

    #[test]
    fn test_fss_field_too_large() {
        let mut buf: [u8; 8] = [0; 8];
        let error =
            write_fss_field(LargeFileFlag::Normal, u32::MAX as u64 + 1, &mut buf).unwrap_err();
        assert_eq!(error, PduError::FileSizeTooLarge(u32::MAX as u64 + 1));
    }
}
