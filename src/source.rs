//! # CFDP Send Transaction Module
//!
//! The [SendTransaction] models the sending side of one file copy operation. It is owned and
//! driven by the [crate::entity::EntityEngine].
//!
//! After [SendTransaction::start] was called, the whole opener sequence has been emitted
//! through the send callback: one Metadata PDU, the File Data PDU sequence in strict ascending
//! offset order and the closing EOF PDU. An unacknowledged transaction is finished at that
//! point. An acknowledged transaction stays alive to service NAK PDUs with retransmissions and
//! to close the transfer with the Finished/ACK handshake.
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::checksum::calculate_checksum;
use crate::filestore::{FilestoreError, VirtualFilestore};
use crate::pdu::ack::AckPdu;
use crate::pdu::eof::EofPdu;
use crate::pdu::file_data::FileDataPdu;
use crate::pdu::finished::{FileStatus, FinishedPdu};
use crate::pdu::lv::Lv;
use crate::pdu::metadata::{MetadataGenericParams, MetadataPdu};
use crate::pdu::nak::NakPduReader;
use crate::pdu::{
    ChecksumType, CommonPduConfig, ConditionCode, CrcFlag, Direction, FileDirectiveType,
    LargeFileFlag, PduError, PduHeader, PduType, TransactionStatus, TransmissionMode,
    WritablePduPacket,
};
use crate::time::{CountdownProvider, TimerContext, TimerCreatorProvider};
use crate::util::{UnsignedByteField, UnsignedEnum};
use crate::{
    CfdpUser, GenericSendError, LocalEntityConfig, PduSendProvider, TransactionId,
    TransactionResult, TransactionState,
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transaction is not in the {expected:?} state")]
    InvalidState { expected: TransactionState },
    #[error("filestore error: {0}")]
    Filestore(#[from] FilestoreError),
    #[error("error related to PDU creation: {0}")]
    Pdu(#[from] PduError),
    #[error("issue sending PDU: {0}")]
    Send(#[from] GenericSendError),
}

/// Parameters resolved from the put request, the remote entity configuration and the local
/// entity defaults, in that priority order.
#[derive(Debug, Clone)]
pub struct EffectiveSendParams {
    pub transmission_mode: TransmissionMode,
    pub checksum_type: ChecksumType,
    pub closure_requested: bool,
    pub segment_len: usize,
}

/// State machine for the sending side of one transaction.
#[derive(Debug)]
pub struct SendTransaction<Countdown: CountdownProvider> {
    id: TransactionId,
    dest_id: UnsignedByteField,
    state: TransactionState,
    transmission_mode: TransmissionMode,
    checksum_type: ChecksumType,
    closure_requested: bool,
    source_file: String,
    dest_file: String,
    pdu_conf: CommonPduConfig,
    segment_len: usize,
    file_buf: Vec<u8>,
    file_size: u64,
    checksum: u32,
    bytes_sent: u64,
    eof_sent: bool,
    eof_acked: bool,
    condition_code: ConditionCode,
    file_status: FileStatus,
    naks_processed: u32,
    max_nak_events: u32,
    ack_retries: u32,
    max_ack_retries: u32,
    inactivity_timer: Option<Countdown>,
    ack_timer: Option<Countdown>,
}

impl<Countdown: CountdownProvider> SendTransaction<Countdown> {
    pub fn new(
        id: TransactionId,
        dest_id: UnsignedByteField,
        source_file: &str,
        dest_file: &str,
        params: EffectiveSendParams,
        local_cfg: &LocalEntityConfig,
    ) -> Result<Self, PduError> {
        // Source and destination entity ID fields must have the same width on the wire. Use
        // the larger of the two configured widths.
        let id_width = core::cmp::max(local_cfg.id.width(), dest_id.width());
        let pdu_conf = CommonPduConfig::new(
            local_cfg.id.with_width(id_width),
            dest_id.with_width(id_width),
            *id.seq_num(),
            params.transmission_mode,
            LargeFileFlag::Normal,
            CrcFlag::from(local_cfg.use_crc),
            Direction::TowardsReceiver,
        )?;
        Ok(Self {
            id,
            dest_id,
            state: TransactionState::Initial,
            transmission_mode: params.transmission_mode,
            checksum_type: params.checksum_type,
            closure_requested: params.closure_requested,
            source_file: source_file.to_string(),
            dest_file: dest_file.to_string(),
            pdu_conf,
            segment_len: params.segment_len,
            file_buf: Vec::new(),
            file_size: 0,
            checksum: 0,
            bytes_sent: 0,
            eof_sent: false,
            eof_acked: false,
            condition_code: ConditionCode::NoError,
            file_status: FileStatus::Unreported,
            naks_processed: 0,
            max_nak_events: local_cfg.max_nak_retries,
            ack_retries: 0,
            max_ack_retries: local_cfg.max_ack_retries,
            inactivity_timer: None,
            ack_timer: None,
        })
    }

    #[inline]
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    #[inline]
    pub fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    #[inline]
    pub fn naks_processed(&self) -> u32 {
        self.naks_processed
    }

    /// Transitions the transaction into the active state, reads and caches the source file,
    /// and emits the full opener sequence: Metadata, all File Data PDUs and the EOF PDU.
    ///
    /// For the unacknowledged mode, the transaction is finished when this call returns. For
    /// the acknowledged mode it stays active, waiting for the Finished PDU of the remote
    /// entity and servicing retransmission requests.
    pub fn start(
        &mut self,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
        user: &mut impl CfdpUser,
        timer_creator: &impl TimerCreatorProvider<Countdown = Countdown>,
        inactivity_timeout: core::time::Duration,
        ack_timeout: core::time::Duration,
    ) -> Result<(), SourceError> {
        if self.state != TransactionState::Initial {
            return Err(SourceError::InvalidState {
                expected: TransactionState::Initial,
            });
        }
        self.state = TransactionState::Active;
        self.file_buf = match vfs.read_all(&self.source_file) {
            Ok(data) => data,
            Err(_) => {
                self.complete(false, ConditionCode::FilestoreRejection);
                return Ok(());
            }
        };
        self.file_size = self.file_buf.len() as u64;
        self.checksum = calculate_checksum(&self.file_buf, self.checksum_type);
        self.pdu_conf.file_flag = if self.file_size > u32::MAX as u64 {
            LargeFileFlag::Large
        } else {
            LargeFileFlag::Normal
        };

        self.send_metadata(sender)?;
        let mut offset = 0;
        while offset < self.file_size {
            let segment_len =
                core::cmp::min(self.segment_len as u64, self.file_size - offset);
            self.send_file_data(sender, offset, segment_len)?;
            offset += segment_len;
        }
        self.send_eof(sender, user)?;

        if self.transmission_mode == TransmissionMode::Unacknowledged {
            self.complete(true, ConditionCode::NoError);
        } else {
            self.inactivity_timer =
                Some(timer_creator.create_countdown(TimerContext::Inactivity {
                    expiry_time: inactivity_timeout,
                }));
            self.ack_timer = Some(timer_creator.create_countdown(TimerContext::PositiveAck {
                expiry_time: ack_timeout,
            }));
        }
        Ok(())
    }

    /// Insert an inbound PDU into the state machine.
    ///
    /// Non-directive PDUs and directives which are not part of the sending side procedures are
    /// tolerated and ignored. Suspended and terminal transactions ignore all inbound PDUs.
    pub fn handle_pdu(
        &mut self,
        header: &PduHeader,
        header_len: usize,
        raw_pdu: &[u8],
        sender: &impl PduSendProvider,
    ) -> Result<(), SourceError> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        if let Some(timer) = &mut self.inactivity_timer {
            timer.reset();
        }
        if header.pdu_type() == PduType::FileData || raw_pdu.len() <= header_len {
            return Ok(());
        }
        match FileDirectiveType::try_from(raw_pdu[header_len]) {
            Ok(FileDirectiveType::NakPdu) => {
                let nak_pdu = NakPduReader::from_bytes(raw_pdu)?;
                self.handle_nak_pdu(&nak_pdu, sender)?;
            }
            Ok(FileDirectiveType::AckPdu) => {
                let ack_pdu = AckPdu::from_bytes(raw_pdu)?;
                self.handle_ack_pdu(&ack_pdu);
            }
            Ok(FileDirectiveType::FinishedPdu) => {
                let finished_pdu = FinishedPdu::from_bytes(raw_pdu)?;
                self.handle_finished_pdu(&finished_pdu, sender)?;
            }
            // All other directives are not applicable to the sending side and unknown
            // directive codes must not terminate the transaction.
            _ => (),
        }
        Ok(())
    }

    /// Service the transaction timers. A tick on a terminal transaction is discarded.
    pub fn check_timers(
        &mut self,
        sender: &impl PduSendProvider,
        user: &mut impl CfdpUser,
    ) -> Result<(), SourceError> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        if let Some(timer) = &self.inactivity_timer {
            if timer.has_expired() {
                self.complete(false, ConditionCode::InactivityDetected);
                return Ok(());
            }
        }
        if self.eof_sent && !self.eof_acked {
            let expired = self
                .ack_timer
                .as_ref()
                .map(|timer| timer.has_expired())
                .unwrap_or(false);
            if expired {
                self.ack_retries += 1;
                if self.ack_retries > self.max_ack_retries {
                    self.complete(false, ConditionCode::PositiveAckLimitReached);
                    return Ok(());
                }
                self.send_eof(sender, user)?;
                if let Some(timer) = &mut self.ack_timer {
                    timer.reset();
                }
            }
        }
        Ok(())
    }

    /// Models the Cancel.request primitive. No further PDUs will be emitted for this
    /// transaction.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransactionState::Cancelled;
        self.condition_code = ConditionCode::CancelRequestReceived;
    }

    /// Suspension is a state bit. A suspended transaction ignores inbound PDUs and timer
    /// ticks. Suspend in any state other than active is a no-op.
    pub fn suspend(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Suspended;
        }
    }

    /// Resume in any state other than suspended is a no-op.
    pub fn resume(&mut self) {
        if self.state == TransactionState::Suspended {
            self.state = TransactionState::Active;
        }
    }

    pub fn result(&self) -> TransactionResult {
        TransactionResult {
            success: self.state == TransactionState::Completed
                && self.condition_code == ConditionCode::NoError,
            condition_code: self.condition_code,
            file_status: self.file_status,
            bytes_transferred: self.bytes_sent,
        }
    }

    fn complete(&mut self, success: bool, condition_code: ConditionCode) {
        self.state = TransactionState::Completed;
        self.condition_code = if success {
            ConditionCode::NoError
        } else {
            condition_code
        };
    }

    fn handle_nak_pdu(
        &mut self,
        nak_pdu: &NakPduReader,
        sender: &impl PduSendProvider,
    ) -> Result<(), SourceError> {
        self.naks_processed += 1;
        if self.naks_processed > self.max_nak_events {
            self.complete(false, ConditionCode::NakLimitReached);
            return Ok(());
        }
        for (start, end) in nak_pdu.segment_requests_iter() {
            // A (0, 0) segment request asks for the Metadata PDU again.
            if start == 0 && end == 0 {
                self.send_metadata(sender)?;
                continue;
            }
            // Requests straddling the end of the file are silently skipped.
            if end > self.file_size || start >= end {
                continue;
            }
            self.send_file_data(sender, start, end - start)?;
        }
        Ok(())
    }

    fn handle_ack_pdu(&mut self, ack_pdu: &AckPdu) {
        if ack_pdu.directive_code_of_acked_pdu() == FileDirectiveType::EofPdu {
            self.eof_acked = true;
        }
    }

    fn handle_finished_pdu(
        &mut self,
        finished_pdu: &FinishedPdu,
        sender: &impl PduSendProvider,
    ) -> Result<(), SourceError> {
        let ack_pdu = AckPdu::new_for_finished_pdu(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            finished_pdu.condition_code(),
            TransactionStatus::Terminated,
        );
        self.send_pdu(sender, &ack_pdu)?;
        self.file_status = finished_pdu.file_status();
        self.complete(
            finished_pdu.condition_code() == ConditionCode::NoError,
            finished_pdu.condition_code(),
        );
        Ok(())
    }

    fn send_metadata(&self, sender: &impl PduSendProvider) -> Result<(), SourceError> {
        // The file name lengths were checked when the put request was built.
        let metadata_pdu = MetadataPdu::new(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            MetadataGenericParams::new(
                self.closure_requested,
                self.checksum_type,
                self.file_size,
            ),
            Lv::new_from_str(&self.source_file).map_err(|_| PduError::Format)?,
            Lv::new_from_str(&self.dest_file).map_err(|_| PduError::Format)?,
        );
        self.send_pdu(sender, &metadata_pdu)
    }

    fn send_file_data(
        &mut self,
        sender: &impl PduSendProvider,
        offset: u64,
        len: u64,
    ) -> Result<(), SourceError> {
        let file_data_pdu = FileDataPdu::new_no_seg_metadata(
            PduHeader::new_for_file_data_default(self.pdu_conf, 0),
            offset,
            &self.file_buf[offset as usize..(offset + len) as usize],
        );
        self.send_pdu(sender, &file_data_pdu)?;
        // Monotonic progress, retransmissions do not count twice.
        self.bytes_sent = self.bytes_sent.max(offset + len);
        Ok(())
    }

    fn send_eof(
        &mut self,
        sender: &impl PduSendProvider,
        user: &mut impl CfdpUser,
    ) -> Result<(), SourceError> {
        let eof_pdu = EofPdu::new_no_error(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            self.checksum,
            self.file_size,
        );
        self.send_pdu(sender, &eof_pdu)?;
        self.eof_sent = true;
        user.eof_sent_indication(&self.id);
        Ok(())
    }

    fn send_pdu(
        &self,
        sender: &impl PduSendProvider,
        pdu: &impl WritablePduPacket,
    ) -> Result<(), SourceError> {
        let raw_pdu = pdu.to_vec()?;
        sender.send_pdu(self.dest_id.value(), &raw_pdu)?;
        Ok(())
    }
}
