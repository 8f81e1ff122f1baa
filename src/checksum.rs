//! Checksum engines used to verify file integrity.
use crate::pdu::ChecksumType;
use crc::{Crc, CRC_32_ISCSI, CRC_32_ISO_HDLC};

/// [Crc] instance backing [ChecksumType::Crc32].
///
/// Polynomial 0xEDB88320 (reflected), initial value 0xFFFFFFFF, final XOR 0xFFFFFFFF.
pub const CRC_32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
/// [Crc] instance backing [ChecksumType::Crc32C].
pub const CRC_32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Modular legacy checksum.
///
/// The data is treated as a stream of big-endian 32-bit words which are accumulated with
/// wrapping addition. A trailing partial word is left-aligned: the remaining bytes fill the
/// high octets and the low octets stay zero.
pub fn modular_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[0..chunk.len()].copy_from_slice(chunk);
        checksum = checksum.wrapping_add(u32::from_be_bytes(word));
    }
    checksum
}

/// Calculate the checksum of an in-memory buffer with the given checksum type.
///
/// The null checksum always evaluates to 0, receivers skip verification for it.
pub fn calculate_checksum(data: &[u8], checksum_type: ChecksumType) -> u32 {
    match checksum_type {
        ChecksumType::Modular => modular_checksum(data),
        ChecksumType::Crc32 => CRC_32.checksum(data),
        ChecksumType::Crc32C => CRC_32C.checksum(data),
        ChecksumType::NullChecksum => 0,
    }
}
