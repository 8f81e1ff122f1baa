//! This crate implements the core of the CCSDS File Delivery Protocol (CFDP) as specified in
//! CCSDS 727.0-B-5.
//!
//! The basic idea of CFDP is to convert files of any size into a stream of packets called
//! packet data units (PDU). CFDP has an unacknowledged (Class 1) and an acknowledged (Class 2)
//! mode. The unacknowledged mode is applicable for simplex communication paths, while the
//! acknowledged mode includes lost segment detection, NAK driven retransmission and a
//! Finished/ACK handshake to confirm delivery even over unreliable connections.
//!
//! The crate consists of three layers:
//!
//! 1. The bit-exact PDU codec inside the [pdu] module together with the [util] helpers for the
//!    variable-width header fields.
//! 2. The transfer state machines: [source::SendTransaction] models the sending side of one
//!    transaction, [dest::ReceiveTransaction] the receiving side.
//! 3. The [entity::EntityEngine] which owns the per-entity transaction registry, routes
//!    inbound PDUs and exposes the put/cancel/suspend/resume operations to the application.
//!
//! Transports and filestores are external collaborators: the engine emits raw PDU buffers
//! through a [PduSendProvider] and accesses files exclusively through the
//! [filestore::VirtualFilestore] abstraction rooted at a configured directory.
//!
//! The codec and data-structure layers are `no_std` compatible with the `alloc` feature, the
//! engine and the native filestore require the `std` feature which is enabled by default.
#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub mod checksum;
#[cfg(feature = "std")]
pub mod dest;
#[cfg(feature = "std")]
pub mod entity;
#[cfg(feature = "alloc")]
pub mod filestore;
pub mod pdu;
pub mod request;
#[cfg(feature = "alloc")]
pub mod segments;
#[cfg(feature = "std")]
pub mod source;
pub mod time;
pub mod util;

use core::hash::Hash;
use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pdu::finished::FileStatus;
use crate::pdu::{ChecksumType, ConditionCode, TransmissionMode};
use crate::util::{UnsignedByteField, UnsignedEnum};

#[cfg(feature = "std")]
pub use std_mod::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityType {
    Sending,
    Receiving,
}

/// The CFDP transaction ID of a CFDP transaction consists of the source entity ID and the
/// sequence number of that transfer, which is also determined by the CFDP source entity.
#[derive(Debug, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId {
    source_id: UnsignedByteField,
    seq_num: UnsignedByteField,
}

impl TransactionId {
    pub fn new(source_id: UnsignedByteField, seq_num: UnsignedByteField) -> Self {
        Self { source_id, seq_num }
    }

    pub fn source_id(&self) -> &UnsignedByteField {
        &self.source_id
    }

    pub fn seq_num(&self) -> &UnsignedByteField {
        &self.seq_num
    }
}

impl Hash for TransactionId {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.source_id.value().hash(state);
        self.seq_num.value().hash(state);
    }
}

impl PartialEq for TransactionId {
    fn eq(&self, other: &Self) -> bool {
        self.source_id.value() == other.source_id.value()
            && self.seq_num.value() == other.seq_num.value()
    }
}

/// Lifecycle state of a transaction.
///
/// The terminal states are absorbing, the engine drops a transaction from its registry as soon
/// as one of them is reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionState {
    Initial = 0,
    Active = 1,
    Suspended = 2,
    Completed = 3,
    Cancelled = 4,
}

impl TransactionState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Cancelled
        )
    }
}

/// Final outcome of a transaction, published with the transaction finished indication.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionResult {
    pub success: bool,
    pub condition_code: ConditionCode,
    pub file_status: FileStatus,
    pub bytes_transferred: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionFinishedParams {
    pub id: TransactionId,
    pub result: TransactionResult,
}

/// The user trait contains the indications the CFDP entity reports back to the application.
pub trait CfdpUser {
    /// A new transaction was created, either through a put request or by the first PDU of an
    /// inbound transfer.
    fn transaction_indication(&mut self, id: &TransactionId);
    fn eof_sent_indication(&mut self, id: &TransactionId);
    fn eof_recvd_indication(&mut self, id: &TransactionId);
    /// The transaction reached a terminal state and was removed from the engine registry.
    fn transaction_finished_indication(&mut self, params: &TransactionFinishedParams);
}

/// Each CFDP entity is configured with a [LocalEntityConfig], the local part of the Management
/// Information Base (MIB).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocalEntityConfig {
    /// Used as the source entity ID on all outbound PDUs. The width of this field also
    /// determines the entity ID width on the wire.
    pub id: UnsignedByteField,
    /// Octet width of the transaction sequence number on the wire, range 1..=8.
    pub seq_num_width: usize,
    /// Upper bound for the file data PDU payload size.
    pub max_file_segment_len: usize,
    pub default_transmission_mode: TransmissionMode,
    pub default_checksum_type: ChecksumType,
    /// Sets the CRC flag in outbound PDU headers, which appends a 16-bit trailer checksum.
    pub use_crc: bool,
    pub inactivity_timeout: Duration,
    pub ack_timeout: Duration,
    pub nak_timeout: Duration,
    pub max_ack_retries: u32,
    pub max_nak_retries: u32,
}

impl LocalEntityConfig {
    pub fn new_with_default_values(id: UnsignedByteField) -> Self {
        Self {
            id,
            seq_num_width: 2,
            max_file_segment_len: 1024,
            default_transmission_mode: TransmissionMode::Unacknowledged,
            default_checksum_type: ChecksumType::Crc32,
            use_crc: false,
            inactivity_timeout: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(10),
            nak_timeout: Duration::from_secs(10),
            max_ack_retries: 2,
            max_nak_retries: 2,
        }
    }
}

/// This structure models the remote entity configuration information, the per-peer part of the
/// Management Information Base (MIB).
///
/// ## Fields
///
/// * `entity_id` - The ID of the remote entity.
/// * `max_file_segment_len` - Optional override for the maximum file segment length used for
///   transfers to this remote entity. The smaller of this value and the local
///   `max_file_segment_len` is used.
/// * `closure_requested_by_default` - If the closure requested field is not supplied as part of
///   the put request, it will be determined from this field.
/// * `default_transmission_mode` - If the transmission mode is not supplied as part of the put
///   request, it will be determined from this field.
/// * `default_checksum_type` - Default checksum type for all file transmissions to this remote
///   entity, unless overridden by the put request.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoteEntityConfig {
    pub entity_id: UnsignedByteField,
    pub max_file_segment_len: Option<usize>,
    pub closure_requested_by_default: bool,
    pub default_transmission_mode: TransmissionMode,
    pub default_checksum_type: ChecksumType,
}

impl RemoteEntityConfig {
    pub fn new_with_default_values(
        entity_id: UnsignedByteField,
        default_transmission_mode: TransmissionMode,
        default_checksum_type: ChecksumType,
    ) -> Self {
        Self {
            entity_id,
            max_file_segment_len: None,
            closure_requested_by_default: false,
            default_transmission_mode,
            default_checksum_type,
        }
    }
}

pub trait RemoteEntityConfigProvider {
    /// Retrieve the remote entity configuration for the given remote ID.
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig>;
    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig>;
    /// Add a new remote configuration. Returns [true] if a configuration for the entity ID
    /// already existed and was replaced.
    fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool;
    /// Remove a configuration. Returns [true] if a configuration was removed.
    fn remove_config(&mut self, remote_id: u64) -> bool;
}

/// A single remote entity configuration also implements [RemoteEntityConfigProvider].
/// [RemoteEntityConfigProvider::add_config] and [RemoteEntityConfigProvider::remove_config]
/// are no-ops which always return [false].
impl RemoteEntityConfigProvider for RemoteEntityConfig {
    fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
        if remote_id == self.entity_id.value() {
            return Some(self);
        }
        None
    }

    fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
        if remote_id == self.entity_id.value() {
            return Some(self);
        }
        None
    }

    fn add_config(&mut self, _cfg: &RemoteEntityConfig) -> bool {
        false
    }

    fn remove_config(&mut self, _remote_id: u64) -> bool {
        false
    }
}

#[cfg(feature = "std")]
pub mod std_mod {
    use super::*;
    use hashbrown::HashMap;
    use std::sync::mpsc;

    /// This is a thin wrapper around a [HashMap] to store remote entity configurations.
    #[derive(Default, Debug)]
    pub struct StdRemoteEntityConfigProvider(pub HashMap<u64, RemoteEntityConfig>);

    impl RemoteEntityConfigProvider for StdRemoteEntityConfigProvider {
        fn get(&self, remote_id: u64) -> Option<&RemoteEntityConfig> {
            self.0.get(&remote_id)
        }
        fn get_mut(&mut self, remote_id: u64) -> Option<&mut RemoteEntityConfig> {
            self.0.get_mut(&remote_id)
        }
        fn add_config(&mut self, cfg: &RemoteEntityConfig) -> bool {
            self.0.insert(cfg.entity_id.value(), *cfg).is_some()
        }
        fn remove_config(&mut self, remote_id: u64) -> bool {
            self.0.remove(&remote_id).is_some()
        }
    }

    /// Generic error type for sending a PDU.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
    #[non_exhaustive]
    pub enum GenericSendError {
        #[error("RX disconnected")]
        RxDisconnected,
        #[error("queue is full, fill count {0:?}")]
        QueueFull(Option<u32>),
        #[error("other send error")]
        Other,
    }

    /// Send capability used by the transfer state machines.
    ///
    /// Every outbound PDU is handed to this provider together with the destination entity ID.
    /// An external transport consumes the buffers, framing and endpoint lookup are its
    /// business.
    pub trait PduSendProvider {
        fn send_pdu(&self, dest_entity_id: u64, raw_pdu: &[u8]) -> Result<(), GenericSendError>;
    }

    /// Owned PDU buffer with the destination entity ID it should be shipped to.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PduOwnedWithDest {
        pub dest_entity_id: u64,
        pub pdu: alloc::vec::Vec<u8>,
    }

    impl PduSendProvider for mpsc::Sender<PduOwnedWithDest> {
        fn send_pdu(&self, dest_entity_id: u64, raw_pdu: &[u8]) -> Result<(), GenericSendError> {
            self.send(PduOwnedWithDest {
                dest_entity_id,
                pdu: raw_pdu.to_vec(),
            })
            .map_err(|_| GenericSendError::RxDisconnected)?;
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::time::{CountdownProvider, TimerContext, TimerCreatorProvider};
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub const LOCAL_ID: u64 = 1;
    pub const REMOTE_ID: u64 = 2;

    pub fn local_id_ubf() -> UnsignedByteField {
        UnsignedByteField::new(2, LOCAL_ID)
    }

    pub fn remote_id_ubf() -> UnsignedByteField {
        UnsignedByteField::new(2, REMOTE_ID)
    }

    #[derive(Default)]
    pub struct TestCfdpUser {
        pub transaction_indication_call_count: u32,
        pub eof_sent_call_count: u32,
        pub eof_recvd_call_count: u32,
        pub finished_queue: VecDeque<TransactionFinishedParams>,
    }

    impl CfdpUser for TestCfdpUser {
        fn transaction_indication(&mut self, _id: &TransactionId) {
            self.transaction_indication_call_count += 1;
        }

        fn eof_sent_indication(&mut self, _id: &TransactionId) {
            self.eof_sent_call_count += 1;
        }

        fn eof_recvd_indication(&mut self, _id: &TransactionId) {
            self.eof_recvd_call_count += 1;
        }

        fn transaction_finished_indication(&mut self, params: &TransactionFinishedParams) {
            self.finished_queue.push_back(*params);
        }
    }

    pub struct SentPdu {
        pub dest_entity_id: u64,
        pub raw_pdu: Vec<u8>,
    }

    #[derive(Default)]
    pub struct TestCfdpSender {
        pub packet_queue: RefCell<VecDeque<SentPdu>>,
    }

    impl PduSendProvider for TestCfdpSender {
        fn send_pdu(&self, dest_entity_id: u64, raw_pdu: &[u8]) -> Result<(), GenericSendError> {
            self.packet_queue.borrow_mut().push_back(SentPdu {
                dest_entity_id,
                raw_pdu: raw_pdu.to_vec(),
            });
            Ok(())
        }
    }

    impl TestCfdpSender {
        pub fn retrieve_next_pdu(&self) -> Option<SentPdu> {
            self.packet_queue.borrow_mut().pop_front()
        }

        pub fn queue_empty(&self) -> bool {
            self.packet_queue.borrow().is_empty()
        }

        pub fn num_queued(&self) -> usize {
            self.packet_queue.borrow().len()
        }
    }

    /// Allows tests to expire specific timer classes on demand.
    #[derive(Debug, Default, Clone)]
    pub struct TimerExpiryControl {
        pub inactivity: Arc<AtomicBool>,
        pub nak_activity: Arc<AtomicBool>,
        pub positive_ack: Arc<AtomicBool>,
    }

    impl TimerExpiryControl {
        pub fn expire_inactivity(&self) {
            self.inactivity.store(true, Ordering::Relaxed);
        }

        pub fn expire_nak_activity(&self) {
            self.nak_activity.store(true, Ordering::Relaxed);
        }

        pub fn expire_positive_ack(&self) {
            self.positive_ack.store(true, Ordering::Relaxed);
        }
    }

    #[derive(Debug)]
    pub struct TestCountdown {
        expired: Arc<AtomicBool>,
    }

    impl CountdownProvider for TestCountdown {
        fn has_expired(&self) -> bool {
            self.expired.load(Ordering::Relaxed)
        }

        fn reset(&mut self) {
            self.expired.store(false, Ordering::Relaxed);
        }
    }

    pub struct TestTimerCreator {
        control: TimerExpiryControl,
    }

    impl TestTimerCreator {
        pub fn new(control: &TimerExpiryControl) -> Self {
            Self {
                control: control.clone(),
            }
        }
    }

    impl TimerCreatorProvider for TestTimerCreator {
        type Countdown = TestCountdown;

        fn create_countdown(&self, timer_context: TimerContext) -> Self::Countdown {
            let expired = match timer_context {
                TimerContext::Inactivity { .. } => self.control.inactivity.clone(),
                TimerContext::NakActivity { .. } => self.control.nak_activity.clone(),
                TimerContext::PositiveAck { .. } => self.control.positive_ack.clone(),
            };
            TestCountdown { expired }
        }
    }

    pub fn basic_remote_cfg_table(
        dest_id: impl Into<UnsignedByteField>,
        default_transmission_mode: TransmissionMode,
    ) -> StdRemoteEntityConfigProvider {
        let mut table = StdRemoteEntityConfigProvider::default();
        let remote_entity_cfg = RemoteEntityConfig::new_with_default_values(
            dest_id.into(),
            default_transmission_mode,
            ChecksumType::Crc32,
        );
        table.add_config(&remote_entity_cfg);
        table
    }

    #[test]
    fn test_transaction_id() {
        let transaction_id =
            TransactionId::new(UnsignedByteField::new(2, 1), UnsignedByteField::new(2, 2));
        assert_eq!(transaction_id.source_id().value(), 1);
        assert_eq!(transaction_id.seq_num().value(), 2);
    }

    #[test]
    fn test_transaction_id_eq_ignores_width() {
        let id_0 = TransactionId::new(UnsignedByteField::new(2, 1), UnsignedByteField::new(2, 2));
        let id_1 = TransactionId::new(UnsignedByteField::new(1, 1), UnsignedByteField::new(4, 2));
        assert_eq!(id_0, id_1);
    }

    #[test]
    fn transaction_id_usable_as_map_key() {
        let mut map = hashbrown::HashMap::new();
        let transaction_id =
            TransactionId::new(UnsignedByteField::new(1, 1), UnsignedByteField::new(1, 2));
        map.insert(transaction_id, 5_u32);
        assert_eq!(map[&transaction_id], 5);
    }

    #[test]
    fn test_transaction_state_terminal() {
        assert!(!TransactionState::Initial.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
        assert!(!TransactionState::Suspended.is_terminal());
        assert!(TransactionState::Completed.is_terminal());
        assert!(TransactionState::Cancelled.is_terminal());
    }

    #[test]
    fn test_remote_cfg_provider_single() {
        let mut remote_entity_cfg = RemoteEntityConfig::new_with_default_values(
            remote_id_ubf(),
            TransmissionMode::Unacknowledged,
            ChecksumType::Crc32,
        );
        let retrieved = remote_entity_cfg.get(REMOTE_ID).unwrap();
        assert_eq!(retrieved.entity_id.value(), REMOTE_ID);
        assert!(remote_entity_cfg.get(LOCAL_ID).is_none());
        let dummy = RemoteEntityConfig::new_with_default_values(
            local_id_ubf(),
            TransmissionMode::Unacknowledged,
            ChecksumType::Crc32,
        );
        assert!(!remote_entity_cfg.add_config(&dummy));
        assert!(!remote_entity_cfg.remove_config(REMOTE_ID));
        assert!(remote_entity_cfg.get_mut(REMOTE_ID).is_some());
        assert!(remote_entity_cfg.get_mut(LOCAL_ID).is_none());
    }

    #[test]
    fn test_remote_cfg_provider_std() {
        let mut provider = StdRemoteEntityConfigProvider::default();
        let remote_entity_cfg = RemoteEntityConfig::new_with_default_values(
            remote_id_ubf(),
            TransmissionMode::Unacknowledged,
            ChecksumType::Crc32,
        );
        assert!(!provider.add_config(&remote_entity_cfg));
        assert_eq!(provider.0.len(), 1);
        let cfg = provider.get(REMOTE_ID).unwrap();
        assert_eq!(cfg.entity_id.value(), REMOTE_ID);
        let cfg_mut = provider.get_mut(REMOTE_ID).unwrap();
        cfg_mut.default_checksum_type = ChecksumType::Crc32C;
        assert!(provider.remove_config(REMOTE_ID));
        assert!(!provider.remove_config(REMOTE_ID));
        assert!(provider.get(REMOTE_ID).is_none());
    }

    #[test]
    fn test_local_cfg_defaults() {
        let cfg = LocalEntityConfig::new_with_default_values(local_id_ubf());
        assert_eq!(cfg.seq_num_width, 2);
        assert_eq!(
            cfg.default_transmission_mode,
            TransmissionMode::Unacknowledged
        );
        assert_eq!(cfg.default_checksum_type, ChecksumType::Crc32);
        assert!(!cfg.use_crc);
    }
}
