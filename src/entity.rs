//! # CFDP Entity Engine Module
//!
//! The [EntityEngine] models one CFDP entity. It owns the registry of all active transactions,
//! assigns transaction sequence numbers, routes inbound PDUs to the addressed transaction and
//! forwards the PDUs generated by the transactions to the user provided [PduSendProvider].
//!
//! The engine is designed for a single-process multi-thread environment: an inbound transport
//! delivery thread may invoke [EntityEngine::process_pdu] concurrently with an application
//! thread invoking [EntityEngine::put] or the transaction management operations. The registry
//! lock is never held while a PDU body is dispatched to a transaction, so independent
//! transactions make progress concurrently.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::dest::{DestError, ReceiveTransaction};
use crate::filestore::{FilestoreError, VirtualFilestore};
use crate::pdu::{Direction, PduError, PduHeader, TransactionStatus, TransmissionMode};
use crate::request::ReadablePutRequest;
use crate::source::{EffectiveSendParams, SendTransaction, SourceError};
use crate::time::{CountdownProvider, TimerCreatorProvider};
use crate::util::{max_value_for_width, UnsignedByteField, UnsignedEnum};
use crate::{
    CfdpUser, LocalEntityConfig, PduSendProvider, RemoteEntityConfigProvider,
    TransactionFinishedParams, TransactionId, TransactionState,
};

#[derive(Debug, thiserror::Error)]
pub enum PutRequestError {
    #[error("no remote entity configuration found for {0}")]
    NoRemoteCfgFound(u64),
    #[error("source file does not exist")]
    FileDoesNotExist,
    #[error("filestore error: {0}")]
    Filestore(#[from] FilestoreError),
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),
    #[error("send transaction error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),
    #[error("send transaction error: {0}")]
    Source(#[from] SourceError),
    #[error("receive transaction error: {0}")]
    Dest(#[from] DestError),
}

/// A transaction owned by the engine registry, either the sending or the receiving side of a
/// file copy operation.
#[derive(Debug)]
pub enum Transaction<Countdown: CountdownProvider> {
    Send(SendTransaction<Countdown>),
    Receive(ReceiveTransaction<Countdown>),
}

impl<Countdown: CountdownProvider> Transaction<Countdown> {
    pub fn state(&self) -> TransactionState {
        match self {
            Transaction::Send(tx) => tx.state(),
            Transaction::Receive(tx) => tx.state(),
        }
    }

    pub fn result(&self) -> crate::TransactionResult {
        match self {
            Transaction::Send(tx) => tx.result(),
            Transaction::Receive(tx) => tx.result(),
        }
    }

    pub fn cancel(&mut self) {
        match self {
            Transaction::Send(tx) => tx.cancel(),
            Transaction::Receive(tx) => tx.cancel(),
        }
    }

    pub fn suspend(&mut self) {
        match self {
            Transaction::Send(tx) => tx.suspend(),
            Transaction::Receive(tx) => tx.suspend(),
        }
    }

    pub fn resume(&mut self) {
        match self {
            Transaction::Send(tx) => tx.resume(),
            Transaction::Receive(tx) => tx.resume(),
        }
    }
}

type TransactionRef<Countdown> = Arc<Mutex<Transaction<Countdown>>>;

/// The CFDP entity engine.
///
/// One instance models one CFDP entity with its entity ID, its Management Information Base and
/// its set of active transactions. File copy operations are started with [Self::put], inbound
/// PDU buffers are inserted with [Self::process_pdu] and the timers are serviced by calling
/// [Self::check_timers] periodically.
pub struct EntityEngine<
    PduSender: PduSendProvider,
    Vfs: VirtualFilestore,
    Remotes: RemoteEntityConfigProvider,
    TimerCreator: TimerCreatorProvider<Countdown = Countdown>,
    Countdown: CountdownProvider,
> {
    local_cfg: LocalEntityConfig,
    remote_cfg_table: Remotes,
    pdu_sender: PduSender,
    vfs: Vfs,
    timer_creator: TimerCreator,
    seq_count: AtomicU64,
    transactions: Mutex<HashMap<TransactionId, TransactionRef<Countdown>>>,
}

impl<
        PduSender: PduSendProvider,
        Vfs: VirtualFilestore,
        Remotes: RemoteEntityConfigProvider,
        TimerCreator: TimerCreatorProvider<Countdown = Countdown>,
        Countdown: CountdownProvider,
    > EntityEngine<PduSender, Vfs, Remotes, TimerCreator, Countdown>
{
    pub fn new(
        local_cfg: LocalEntityConfig,
        remote_cfg_table: Remotes,
        pdu_sender: PduSender,
        vfs: Vfs,
        timer_creator: TimerCreator,
    ) -> Self {
        Self {
            local_cfg,
            remote_cfg_table,
            pdu_sender,
            vfs,
            timer_creator,
            seq_count: AtomicU64::new(0),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn local_cfg(&self) -> &LocalEntityConfig {
        &self.local_cfg
    }

    #[inline]
    pub fn entity_id(&self) -> UnsignedByteField {
        self.local_cfg.id
    }

    #[inline]
    pub fn pdu_sender(&self) -> &PduSender {
        &self.pdu_sender
    }

    #[inline]
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// This function models the Put.request CFDP primitive and starts a file copy operation.
    ///
    /// A new send transaction is registered with a freshly assigned transaction sequence
    /// number and started immediately: the full opener sequence is emitted through the send
    /// callback before this call returns. An unacknowledged transaction is already finished at
    /// that point and has been removed from the registry again.
    pub fn put(
        &self,
        user: &mut impl CfdpUser,
        request: &impl ReadablePutRequest,
    ) -> Result<TransactionId, PutRequestError> {
        let remote_id = request.destination_id().value();
        let remote_cfg = self
            .remote_cfg_table
            .get(remote_id)
            .ok_or(PutRequestError::NoRemoteCfgFound(remote_id))?;
        if !self.vfs.exists(request.source_file())? {
            return Err(PutRequestError::FileDoesNotExist);
        }
        // Effective parameters: explicit request values take precedence over the per-peer
        // configuration, which takes precedence over the entity defaults.
        let transmission_mode = request
            .transmission_mode()
            .unwrap_or(remote_cfg.default_transmission_mode);
        let checksum_type = request
            .checksum_type()
            .unwrap_or(remote_cfg.default_checksum_type);
        // Closure is implied by the acknowledged mode, the transfer always closes with a
        // Finished PDU there.
        let closure_requested = request.closure_requested()
            || remote_cfg.closure_requested_by_default
            || transmission_mode == TransmissionMode::Acknowledged;
        let segment_len = remote_cfg
            .max_file_segment_len
            .unwrap_or(self.local_cfg.max_file_segment_len)
            .min(self.local_cfg.max_file_segment_len);

        let transaction_id = TransactionId::new(self.local_cfg.id, self.next_seq_num());
        let transaction = SendTransaction::new(
            transaction_id,
            remote_cfg.entity_id,
            request.source_file(),
            request.dest_file(),
            EffectiveSendParams {
                transmission_mode,
                checksum_type,
                closure_requested,
                segment_len,
            },
            &self.local_cfg,
        )?;
        let tx_ref: TransactionRef<Countdown> =
            Arc::new(Mutex::new(Transaction::Send(transaction)));
        self.transactions
            .lock()
            .unwrap()
            .insert(transaction_id, tx_ref.clone());
        user.transaction_indication(&transaction_id);

        let start_result = {
            let mut tx = tx_ref.lock().unwrap();
            match &mut *tx {
                Transaction::Send(send_tx) => send_tx.start(
                    &self.vfs,
                    &self.pdu_sender,
                    user,
                    &self.timer_creator,
                    self.local_cfg.inactivity_timeout,
                    self.local_cfg.ack_timeout,
                ),
                Transaction::Receive(_) => unreachable!("send transaction was just inserted"),
            }
        };
        if let Err(error) = start_result {
            self.transactions.lock().unwrap().remove(&transaction_id);
            return Err(error.into());
        }
        self.remove_if_terminal(user, transaction_id, &tx_ref);
        Ok(transaction_id)
    }

    /// Insert a raw inbound PDU buffer.
    ///
    /// The PDU is routed to the transaction addressed by the
    /// `(source entity ID, transaction sequence number)` pair of its header. An unknown
    /// transaction ID creates a new receive transaction if the PDU travels towards the
    /// receiver, PDUs towards the sender for unknown transactions are dropped.
    pub fn process_pdu(
        &self,
        user: &mut impl CfdpUser,
        raw_pdu: &[u8],
    ) -> Result<(), EntityError> {
        let (header, header_len) = match PduHeader::from_bytes(raw_pdu) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!("discarding undecodable PDU: {error}");
                return Err(error.into());
            }
        };
        let transaction_id = TransactionId::new(
            header.common_pdu_conf().source_id(),
            header.common_pdu_conf().transaction_seq_num,
        );
        let mut created = false;
        let tx_ref = {
            let mut transactions = self.transactions.lock().unwrap();
            match transactions.get(&transaction_id) {
                Some(tx_ref) => tx_ref.clone(),
                None => {
                    if header.common_pdu_conf().direction == Direction::TowardsSender {
                        debug!(
                            "dropping PDU for unknown transaction {:?}",
                            transaction_id
                        );
                        return Ok(());
                    }
                    let tx_ref: TransactionRef<Countdown> =
                        Arc::new(Mutex::new(Transaction::Receive(ReceiveTransaction::new(
                            &header,
                            &self.local_cfg,
                            &self.timer_creator,
                        ))));
                    transactions.insert(transaction_id, tx_ref.clone());
                    created = true;
                    tx_ref
                }
            }
        };
        if created {
            user.transaction_indication(&transaction_id);
        }
        // The registry lock is released here, the PDU body is dispatched while only the
        // per-transaction lock is held.
        {
            let mut tx = tx_ref.lock().unwrap();
            match &mut *tx {
                Transaction::Send(send_tx) => {
                    send_tx.handle_pdu(&header, header_len, raw_pdu, &self.pdu_sender)?
                }
                Transaction::Receive(recv_tx) => recv_tx.handle_pdu(
                    &header,
                    header_len,
                    raw_pdu,
                    &self.vfs,
                    &self.pdu_sender,
                    user,
                    &self.timer_creator,
                )?,
            }
        }
        self.remove_if_terminal(user, transaction_id, &tx_ref);
        Ok(())
    }

    /// Service the timers of all active transactions.
    ///
    /// This drives the inactivity detection, the positive ACK procedure of the sending side
    /// and the NAK activity procedure of the receiving side. Ticks for transactions which
    /// reached a terminal state are discarded.
    pub fn check_timers(&self, user: &mut impl CfdpUser) -> Result<(), EntityError> {
        for (transaction_id, tx_ref) in self.transaction_snapshot() {
            {
                let mut tx = tx_ref.lock().unwrap();
                match &mut *tx {
                    Transaction::Send(send_tx) => {
                        send_tx.check_timers(&self.pdu_sender, user)?
                    }
                    Transaction::Receive(recv_tx) => {
                        recv_tx.check_timers(&self.vfs, &self.pdu_sender)?
                    }
                }
            }
            self.remove_if_terminal(user, transaction_id, &tx_ref);
        }
        Ok(())
    }

    /// Models the Cancel.request primitive. Returns [false] if no transaction with the given
    /// ID is active.
    pub fn cancel(&self, user: &mut impl CfdpUser, transaction_id: &TransactionId) -> bool {
        let tx_ref = match self.get_transaction(transaction_id) {
            Some(tx_ref) => tx_ref,
            None => return false,
        };
        tx_ref.lock().unwrap().cancel();
        self.remove_if_terminal(user, *transaction_id, &tx_ref);
        true
    }

    /// Models the Suspend.request primitive. Returns [false] if no transaction with the given
    /// ID is active.
    pub fn suspend(&self, transaction_id: &TransactionId) -> bool {
        match self.get_transaction(transaction_id) {
            Some(tx_ref) => {
                tx_ref.lock().unwrap().suspend();
                true
            }
            None => false,
        }
    }

    /// Models the Resume.request primitive. Returns [false] if no transaction with the given
    /// ID is active.
    pub fn resume(&self, transaction_id: &TransactionId) -> bool {
        match self.get_transaction(transaction_id) {
            Some(tx_ref) => {
                tx_ref.lock().unwrap().resume();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the status of the given transaction.
    ///
    /// The engine does not retain a transaction history, transactions which are unknown,
    /// including finished ones which were removed from the registry, report
    /// [TransactionStatus::Undefined].
    pub fn transaction_status(&self, transaction_id: &TransactionId) -> TransactionStatus {
        match self.get_transaction(transaction_id) {
            Some(tx_ref) => {
                if tx_ref.lock().unwrap().state().is_terminal() {
                    TransactionStatus::Terminated
                } else {
                    TransactionStatus::Active
                }
            }
            None => TransactionStatus::Undefined,
        }
    }

    /// Snapshot of all live transaction IDs.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.transactions.lock().unwrap().keys().copied().collect()
    }

    /// Cancels all live transactions and notifies the completion listener for each of them.
    pub fn shutdown(&self, user: &mut impl CfdpUser) {
        for (transaction_id, tx_ref) in self.transaction_snapshot() {
            tx_ref.lock().unwrap().cancel();
            self.remove_if_terminal(user, transaction_id, &tx_ref);
        }
    }

    fn next_seq_num(&self) -> UnsignedByteField {
        let width = self.local_cfg.seq_num_width;
        let raw = self.seq_count.fetch_add(1, Ordering::SeqCst);
        UnsignedByteField::new(width, raw & max_value_for_width(width))
    }

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Option<TransactionRef<Countdown>> {
        self.transactions
            .lock()
            .unwrap()
            .get(transaction_id)
            .cloned()
    }

    fn transaction_snapshot(&self) -> Vec<(TransactionId, TransactionRef<Countdown>)> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .map(|(transaction_id, tx_ref)| (*transaction_id, tx_ref.clone()))
            .collect()
    }

    fn remove_if_terminal(
        &self,
        user: &mut impl CfdpUser,
        transaction_id: TransactionId,
        tx_ref: &TransactionRef<Countdown>,
    ) {
        let (terminal, result) = {
            let tx = tx_ref.lock().unwrap();
            (tx.state().is_terminal(), tx.result())
        };
        if !terminal {
            return;
        }
        self.transactions.lock().unwrap().remove(&transaction_id);
        user.transaction_finished_indication(&TransactionFinishedParams {
            id: transaction_id,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::NativeFilestore;
    use crate::pdu::eof::EofPdu;
    use crate::pdu::file_data::FileDataPdu;
    use crate::pdu::finished::{FileStatus, FinishedPdu};
    use crate::pdu::lv::Lv;
    use crate::pdu::metadata::{MetadataGenericParams, MetadataPdu};
    use crate::pdu::nak::NakPduCreator;
    use crate::pdu::{ChecksumType, CommonPduConfig, ConditionCode, PduType, WritablePduPacket};
    use crate::checksum::CRC_32;
    use crate::request::PutRequestOwned;
    use crate::tests::{
        basic_remote_cfg_table, local_id_ubf, remote_id_ubf, TestCfdpSender, TestCfdpUser,
        TestCountdown, TestTimerCreator, TimerExpiryControl, LOCAL_ID, REMOTE_ID,
    };
    use crate::StdRemoteEntityConfigProvider;
    use tempfile::TempDir;

    type TestEngine = EntityEngine<
        TestCfdpSender,
        NativeFilestore,
        StdRemoteEntityConfigProvider,
        TestTimerCreator,
        TestCountdown,
    >;

    struct EngineTestbench {
        _tmpdir: TempDir,
        engine: TestEngine,
        user: TestCfdpUser,
        expiry_control: TimerExpiryControl,
    }

    impl EngineTestbench {
        /// Testbench with the local ID as the engine entity. Files are created relative to a
        /// temporary filestore root.
        fn new(local_id: UnsignedByteField, remote_id: UnsignedByteField) -> Self {
            let tmpdir = TempDir::new().expect("creating tmpdir failed");
            let vfs = NativeFilestore::new(tmpdir.path());
            let local_cfg = LocalEntityConfig::new_with_default_values(local_id);
            let expiry_control = TimerExpiryControl::default();
            let engine = EntityEngine::new(
                local_cfg,
                basic_remote_cfg_table(remote_id, TransmissionMode::Unacknowledged),
                TestCfdpSender::default(),
                vfs,
                TestTimerCreator::new(&expiry_control),
            );
            Self {
                _tmpdir: tmpdir,
                engine,
                user: TestCfdpUser::default(),
                expiry_control,
            }
        }

        fn write_source_file(&self, name: &str, content: &[u8]) {
            // Direct access to the same filestore root as the engine.
            let vfs = NativeFilestore::new(self.engine.vfs().root());
            vfs.write_all(name, content).unwrap();
        }

        fn put(&mut self, request: &PutRequestOwned) -> TransactionId {
            self.engine
                .put(&mut self.user, request)
                .expect("put request failed")
        }

        fn sender_pdu_conf(&self, seq_num: u64) -> CommonPduConfig {
            // Inbound PDUs come from the remote entity towards this engine.
            CommonPduConfig::new_with_byte_fields(
                remote_id_ubf(),
                local_id_ubf(),
                UnsignedByteField::new(2, seq_num),
            )
            .unwrap()
        }
    }

    fn regular_request(mode: TransmissionMode) -> PutRequestOwned {
        PutRequestOwned::new(
            remote_id_ubf(),
            "src.bin",
            "dest.bin",
            Some(mode),
            None,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_class_1_put_completes_synchronously() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[0x48, 0x49]);
        let request = regular_request(TransmissionMode::Unacknowledged);
        let transaction_id = tb.put(&request);
        assert_eq!(transaction_id.source_id().value(), LOCAL_ID);
        assert_eq!(transaction_id.seq_num().value(), 0);
        // Metadata, two file data PDUs with the default segment length would be one, EOF.
        assert_eq!(tb.engine.pdu_sender().num_queued(), 3);
        // Complete before put returned, the registry entry is gone.
        assert!(tb.engine.active_transactions().is_empty());
        assert_eq!(
            tb.engine.transaction_status(&transaction_id),
            TransactionStatus::Undefined
        );
        assert_eq!(tb.user.transaction_indication_call_count, 1);
        assert_eq!(tb.user.finished_queue.len(), 1);
        let finished = tb.user.finished_queue.pop_front().unwrap();
        assert!(finished.result.success);
        assert_eq!(finished.result.bytes_transferred, 2);
    }

    #[test]
    fn test_sequence_numbers_increment() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3]);
        let request = regular_request(TransmissionMode::Unacknowledged);
        let id_0 = tb.put(&request);
        let id_1 = tb.put(&request);
        assert_eq!(id_0.seq_num().value(), 0);
        assert_eq!(id_1.seq_num().value(), 1);
    }

    #[test]
    fn test_put_without_remote_cfg_fails() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1]);
        let request = PutRequestOwned::new(
            UnsignedByteField::new(2, 99),
            "src.bin",
            "dest.bin",
            None,
            None,
            false,
        )
        .unwrap();
        let error = tb.engine.put(&mut tb.user, &request).unwrap_err();
        assert!(matches!(error, PutRequestError::NoRemoteCfgFound(99)));
    }

    #[test]
    fn test_put_missing_file_fails() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        let request = regular_request(TransmissionMode::Unacknowledged);
        let error = tb.engine.put(&mut tb.user, &request).unwrap_err();
        assert!(matches!(error, PutRequestError::FileDoesNotExist));
    }

    #[test]
    fn test_inbound_class_1_transfer() {
        // This engine acts as the receiving entity: its peer is the LOCAL_ID entity.
        let mut tb = EngineTestbench::new(remote_id_ubf(), local_id_ubf());
        let file_content = b"Hello World!";
        let pdu_conf = {
            let mut pdu_conf = CommonPduConfig::new_with_byte_fields(
                local_id_ubf(),
                remote_id_ubf(),
                UnsignedByteField::new(2, 5),
            )
            .unwrap();
            pdu_conf.trans_mode = TransmissionMode::Unacknowledged;
            pdu_conf
        };
        let metadata_raw = MetadataPdu::new(
            PduHeader::new_for_file_directive(pdu_conf, 0),
            MetadataGenericParams::new(false, ChecksumType::Crc32, file_content.len() as u64),
            Lv::new_from_str("src.bin").unwrap(),
            Lv::new_from_str("dest.bin").unwrap(),
        )
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &metadata_raw).unwrap();
        assert_eq!(tb.user.transaction_indication_call_count, 1);
        assert_eq!(tb.engine.active_transactions().len(), 1);
        let transaction_id = tb.engine.active_transactions()[0];
        assert_eq!(transaction_id.source_id().value(), LOCAL_ID);
        assert_eq!(transaction_id.seq_num().value(), 5);
        assert_eq!(
            tb.engine.transaction_status(&transaction_id),
            TransactionStatus::Active
        );

        let fd_raw = FileDataPdu::new_no_seg_metadata(
            PduHeader::new_for_file_data_default(pdu_conf, 0),
            0,
            file_content,
        )
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &fd_raw).unwrap();
        let eof_raw = EofPdu::new_no_error(
            PduHeader::new_for_file_directive(pdu_conf, 0),
            CRC_32.checksum(file_content),
            file_content.len() as u64,
        )
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &eof_raw).unwrap();

        assert!(tb.engine.active_transactions().is_empty());
        assert_eq!(tb.user.eof_recvd_call_count, 1);
        let finished = tb.user.finished_queue.pop_front().unwrap();
        assert!(finished.result.success);
        let vfs = NativeFilestore::new(tb.engine.vfs().root());
        assert_eq!(vfs.read_all("dest.bin").unwrap(), file_content);
    }

    #[test]
    fn test_unknown_transaction_towards_sender_dropped() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        let finished_raw = FinishedPdu::new_default(
            PduHeader::new_for_file_directive(tb.sender_pdu_conf(0), 0),
            FileStatus::RetainedSuccessfully,
        )
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &finished_raw).unwrap();
        // No receive transaction was created for a PDU towards the sender.
        assert!(tb.engine.active_transactions().is_empty());
        assert_eq!(tb.user.transaction_indication_call_count, 0);
    }

    #[test]
    fn test_undecodable_pdu_rejected() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        let error = tb.engine.process_pdu(&mut tb.user, &[0x20]).unwrap_err();
        assert!(matches!(error, EntityError::Pdu(_)));
    }

    #[test]
    fn test_class_2_full_handshake() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3, 4]);
        let request = regular_request(TransmissionMode::Acknowledged);
        let transaction_id = tb.put(&request);
        assert_eq!(tb.engine.active_transactions().len(), 1);
        assert_eq!(
            tb.engine.transaction_status(&transaction_id),
            TransactionStatus::Active
        );
        // Drain the openers.
        let mut openers = Vec::new();
        while let Some(sent) = tb.engine.pdu_sender().retrieve_next_pdu() {
            assert_eq!(sent.dest_entity_id, REMOTE_ID);
            openers.push(sent.raw_pdu);
        }
        assert_eq!(openers.len(), 3);
        let (metadata_header, _) = PduHeader::from_bytes(&openers[0]).unwrap();
        assert_eq!(metadata_header.pdu_type(), PduType::FileDirective);

        // The receiving entity reports successful delivery.
        let mut reply_conf = *metadata_header.common_pdu_conf();
        reply_conf.trans_mode = TransmissionMode::Acknowledged;
        let finished_raw = FinishedPdu::new_default(
            PduHeader::new_for_file_directive(reply_conf, 0),
            FileStatus::RetainedSuccessfully,
        )
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &finished_raw).unwrap();

        // The engine acknowledged the Finished PDU and finished the transaction.
        let ack_raw = tb.engine.pdu_sender().retrieve_next_pdu().unwrap();
        let (ack_header, _) = PduHeader::from_bytes(&ack_raw.raw_pdu).unwrap();
        assert_eq!(ack_header.pdu_type(), PduType::FileDirective);
        assert!(tb.engine.active_transactions().is_empty());
        let finished = tb.user.finished_queue.pop_front().unwrap();
        assert!(finished.result.success);
        assert_eq!(finished.id, transaction_id);
    }

    #[test]
    fn test_cancel() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3, 4]);
        let request = regular_request(TransmissionMode::Acknowledged);
        let transaction_id = tb.put(&request);
        while tb.engine.pdu_sender().retrieve_next_pdu().is_some() {}

        assert!(tb.engine.cancel(&mut tb.user, &transaction_id));
        // The transaction is removed synchronously.
        assert_eq!(
            tb.engine.transaction_status(&transaction_id),
            TransactionStatus::Undefined
        );
        let finished = tb.user.finished_queue.pop_front().unwrap();
        assert!(!finished.result.success);
        assert_eq!(
            finished.result.condition_code,
            ConditionCode::CancelRequestReceived
        );
        // Cancelling again reports the missing transaction.
        assert!(!tb.engine.cancel(&mut tb.user, &transaction_id));

        // A subsequent NAK for the cancelled transaction produces no PDUs.
        let nak_raw = NakPduCreator::new(
            PduHeader::new_for_file_directive(tb.sender_pdu_conf(0), 0),
            0,
            4,
            &[(0, 4)],
        )
        .unwrap()
        .to_vec()
        .unwrap();
        tb.engine.process_pdu(&mut tb.user, &nak_raw).unwrap();
        assert!(tb.engine.pdu_sender().queue_empty());
    }

    #[test]
    fn test_suspend_and_resume_forwarding() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3, 4]);
        let request = regular_request(TransmissionMode::Acknowledged);
        let transaction_id = tb.put(&request);
        assert!(tb.engine.suspend(&transaction_id));
        assert!(tb.engine.resume(&transaction_id));
        let unknown_id = TransactionId::new(
            UnsignedByteField::new(2, 42),
            UnsignedByteField::new(2, 42),
        );
        assert!(!tb.engine.suspend(&unknown_id));
        assert!(!tb.engine.resume(&unknown_id));
        assert!(!tb.engine.cancel(&mut tb.user, &unknown_id));
    }

    #[test]
    fn test_inactivity_timeout_via_check_timers() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3, 4]);
        let request = regular_request(TransmissionMode::Acknowledged);
        let transaction_id = tb.put(&request);
        while tb.engine.pdu_sender().retrieve_next_pdu().is_some() {}

        tb.engine.check_timers(&mut tb.user).unwrap();
        assert_eq!(
            tb.engine.transaction_status(&transaction_id),
            TransactionStatus::Active
        );
        tb.expiry_control.expire_inactivity();
        tb.engine.check_timers(&mut tb.user).unwrap();
        assert!(tb.engine.active_transactions().is_empty());
        let finished = tb.user.finished_queue.pop_front().unwrap();
        assert_eq!(
            finished.result.condition_code,
            ConditionCode::InactivityDetected
        );
    }

    #[test]
    fn test_shutdown_cancels_all() {
        let mut tb = EngineTestbench::new(local_id_ubf(), remote_id_ubf());
        tb.write_source_file("src.bin", &[1, 2, 3, 4]);
        let request = regular_request(TransmissionMode::Acknowledged);
        tb.put(&request);
        tb.put(&request);
        assert_eq!(tb.engine.active_transactions().len(), 2);
        tb.engine.shutdown(&mut tb.user);
        assert!(tb.engine.active_transactions().is_empty());
        assert_eq!(tb.user.finished_queue.len(), 2);
    }
}
