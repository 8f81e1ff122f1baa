//! Put request abstractions used to start file copy operations.
use crate::pdu::{ChecksumType, TransmissionMode};
use crate::util::UnsignedByteField;

#[cfg(feature = "alloc")]
pub use alloc_mod::*;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("file path length {0} exceeds the LV limit of {max} bytes", max = u8::MAX)]
pub struct FilePathTooLargeError(pub usize);

/// This trait is an abstraction for different Put Request structures which can be used by Put
/// Request consumers.
pub trait ReadablePutRequest {
    fn destination_id(&self) -> UnsignedByteField;
    fn source_file(&self) -> &str;
    fn dest_file(&self) -> &str;
    /// Overrides the default transmission mode of the remote entity configuration.
    fn transmission_mode(&self) -> Option<TransmissionMode>;
    /// Overrides the default checksum type of the remote entity configuration.
    fn checksum_type(&self) -> Option<ChecksumType>;
    fn closure_requested(&self) -> bool;
}

/// Borrowed put request variant.
#[derive(Debug, PartialEq, Eq)]
pub struct PutRequest<'src_file, 'dest_file> {
    pub destination_id: UnsignedByteField,
    source_file: &'src_file str,
    dest_file: &'dest_file str,
    pub transmission_mode: Option<TransmissionMode>,
    pub checksum_type: Option<ChecksumType>,
    pub closure_requested: bool,
}

impl<'src_file, 'dest_file> PutRequest<'src_file, 'dest_file> {
    pub fn new(
        destination_id: UnsignedByteField,
        source_file: &'src_file str,
        dest_file: &'dest_file str,
        transmission_mode: Option<TransmissionMode>,
        checksum_type: Option<ChecksumType>,
        closure_requested: bool,
    ) -> Result<Self, FilePathTooLargeError> {
        generic_path_checks(source_file, dest_file)?;
        Ok(Self {
            destination_id,
            source_file,
            dest_file,
            transmission_mode,
            checksum_type,
            closure_requested,
        })
    }
}

impl ReadablePutRequest for PutRequest<'_, '_> {
    fn destination_id(&self) -> UnsignedByteField {
        self.destination_id
    }

    fn source_file(&self) -> &str {
        self.source_file
    }

    fn dest_file(&self) -> &str {
        self.dest_file
    }

    fn transmission_mode(&self) -> Option<TransmissionMode> {
        self.transmission_mode
    }

    fn checksum_type(&self) -> Option<ChecksumType> {
        self.checksum_type
    }

    fn closure_requested(&self) -> bool {
        self.closure_requested
    }
}

/// The file names are serialized as LV fields, so they may not be longer than 255 bytes.
pub fn generic_path_checks(
    source_file: &str,
    dest_file: &str,
) -> Result<(), FilePathTooLargeError> {
    if source_file.len() > u8::MAX as usize {
        return Err(FilePathTooLargeError(source_file.len()));
    }
    if dest_file.len() > u8::MAX as usize {
        return Err(FilePathTooLargeError(dest_file.len()));
    }
    Ok(())
}

#[cfg(feature = "alloc")]
pub mod alloc_mod {
    use super::*;
    use alloc::string::{String, ToString};

    /// Owned variant of [PutRequest] with no lifetimes which is also [Clone]able.
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PutRequestOwned {
        pub destination_id: UnsignedByteField,
        source_file: String,
        dest_file: String,
        pub transmission_mode: Option<TransmissionMode>,
        pub checksum_type: Option<ChecksumType>,
        pub closure_requested: bool,
    }

    impl PutRequestOwned {
        pub fn new(
            destination_id: UnsignedByteField,
            source_file: &str,
            dest_file: &str,
            transmission_mode: Option<TransmissionMode>,
            checksum_type: Option<ChecksumType>,
            closure_requested: bool,
        ) -> Result<Self, FilePathTooLargeError> {
            generic_path_checks(source_file, dest_file)?;
            Ok(Self {
                destination_id,
                source_file: source_file.to_string(),
                dest_file: dest_file.to_string(),
                transmission_mode,
                checksum_type,
                closure_requested,
            })
        }
    }

    impl From<PutRequest<'_, '_>> for PutRequestOwned {
        fn from(req: PutRequest) -> Self {
            Self {
                destination_id: req.destination_id,
                source_file: req.source_file.to_string(),
                dest_file: req.dest_file.to_string(),
                transmission_mode: req.transmission_mode,
                checksum_type: req.checksum_type,
                closure_requested: req.closure_requested,
            }
        }
    }

    impl ReadablePutRequest for PutRequestOwned {
        fn destination_id(&self) -> UnsignedByteField {
            self.destination_id
        }

        fn source_file(&self) -> &str {
            &self.source_file
        }

        fn dest_file(&self) -> &str {
            &self.dest_file
        }

        fn transmission_mode(&self) -> Option<TransmissionMode> {
            self.transmission_mode
        }

        fn checksum_type(&self) -> Option<ChecksumType> {
            self.checksum_type
        }

        fn closure_requested(&self) -> bool {
            self.closure_requested
        }
    }
}
