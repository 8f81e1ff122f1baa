//! # CFDP Receive Transaction Module
//!
//! The [ReceiveTransaction] models the receiving side of one file copy operation. It is
//! created by the [crate::entity::EntityEngine] when the first PDU of an unknown transaction
//! directed towards the receiver arrives.
//!
//! File data segments are accumulated in a [SegmentMap]. When the EOF PDU arrives, the
//! transaction runs a completion attempt: missing byte ranges are either re-requested with a
//! NAK PDU (acknowledged mode) or fail the transfer (unacknowledged mode), the reassembled
//! file is verified against the checksum from the EOF PDU and committed to the filestore, and
//! for the acknowledged mode or when closure was requested, a Finished PDU reports the outcome
//! back to the sending entity.
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::checksum::calculate_checksum;
use crate::filestore::VirtualFilestore;
use crate::pdu::ack::AckPdu;
use crate::pdu::eof::EofPdu;
use crate::pdu::file_data::FileDataPdu;
use crate::pdu::finished::{FileStatus, FinishedPdu};
use crate::pdu::metadata::MetadataPdu;
use crate::pdu::nak::NakPduCreator;
use crate::pdu::{
    ChecksumType, CommonPduConfig, ConditionCode, CrcFlag, FileDirectiveType, PduError,
    PduHeader, PduType, TransactionStatus, TransmissionMode, WritablePduPacket,
};
use crate::segments::SegmentMap;
use crate::time::{CountdownProvider, TimerContext, TimerCreatorProvider};
use crate::util::UnsignedEnum;
use crate::{
    CfdpUser, GenericSendError, LocalEntityConfig, PduSendProvider, TransactionId,
    TransactionResult, TransactionState,
};

#[derive(Debug, thiserror::Error)]
pub enum DestError {
    #[error("error related to PDU creation: {0}")]
    Pdu(#[from] PduError),
    #[error("issue sending PDU: {0}")]
    Send(#[from] GenericSendError),
}

/// State machine for the receiving side of one transaction.
#[derive(Debug)]
pub struct ReceiveTransaction<Countdown: CountdownProvider> {
    id: TransactionId,
    state: TransactionState,
    transmission_mode: TransmissionMode,
    pdu_conf: CommonPduConfig,
    metadata_received: bool,
    source_file: Option<String>,
    dest_file: Option<String>,
    file_size: u64,
    checksum_type: ChecksumType,
    closure_requested: bool,
    expected_checksum: u32,
    segments: SegmentMap,
    bytes_received: u64,
    eof_received: bool,
    condition_code: ConditionCode,
    file_status: FileStatus,
    nak_retries: u32,
    max_nak_retries: u32,
    last_gap_count: Option<usize>,
    nak_timeout: core::time::Duration,
    inactivity_timer: Countdown,
    nak_timer: Option<Countdown>,
}

impl<Countdown: CountdownProvider> ReceiveTransaction<Countdown> {
    /// Construct a new receive transaction from the header of the PDU which triggered its
    /// creation. The source entity ID and the transmission mode are taken from that header.
    pub fn new(
        header: &PduHeader,
        local_cfg: &LocalEntityConfig,
        timer_creator: &impl TimerCreatorProvider<Countdown = Countdown>,
    ) -> Self {
        let mut pdu_conf = *header.common_pdu_conf();
        pdu_conf.crc_flag = CrcFlag::from(local_cfg.use_crc);
        Self {
            id: TransactionId::new(pdu_conf.source_id(), pdu_conf.transaction_seq_num),
            state: TransactionState::Initial,
            transmission_mode: pdu_conf.trans_mode,
            pdu_conf,
            metadata_received: false,
            source_file: None,
            dest_file: None,
            file_size: 0,
            checksum_type: local_cfg.default_checksum_type,
            closure_requested: false,
            expected_checksum: 0,
            segments: SegmentMap::new(),
            bytes_received: 0,
            eof_received: false,
            condition_code: ConditionCode::NoError,
            file_status: FileStatus::Unreported,
            nak_retries: 0,
            max_nak_retries: local_cfg.max_nak_retries,
            last_gap_count: None,
            nak_timeout: local_cfg.nak_timeout,
            inactivity_timer: timer_creator.create_countdown(TimerContext::Inactivity {
                expiry_time: local_cfg.inactivity_timeout,
            }),
            nak_timer: None,
        }
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
    pub fn naks_sent(&self) -> u32 {
        self.nak_retries
    }

    /// Source file name as declared by the Metadata PDU.
    #[inline]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Destination file name as declared by the Metadata PDU.
    #[inline]
    pub fn dest_file(&self) -> Option<&str> {
        self.dest_file.as_deref()
    }

    /// Insert an inbound PDU into the state machine.
    ///
    /// The first PDU transitions the transaction from the initial to the active state.
    /// Unknown or unsupported directives are tolerated so they do not terminate the
    /// transaction. Suspended and terminal transactions ignore all inbound PDUs.
    pub fn handle_pdu(
        &mut self,
        header: &PduHeader,
        header_len: usize,
        raw_pdu: &[u8],
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
        user: &mut impl CfdpUser,
        timer_creator: &impl TimerCreatorProvider<Countdown = Countdown>,
    ) -> Result<(), DestError> {
        if self.state == TransactionState::Initial {
            self.state = TransactionState::Active;
        }
        if self.state != TransactionState::Active {
            return Ok(());
        }
        self.inactivity_timer.reset();
        if header.pdu_type() == PduType::FileData {
            match FileDataPdu::from_bytes(raw_pdu) {
                Ok(file_data_pdu) => self.handle_file_data(&file_data_pdu, vfs, sender)?,
                // Defective file data PDUs are discarded, a gap will be detected later.
                Err(_) => return Ok(()),
            }
            return Ok(());
        }
        if raw_pdu.len() <= header_len {
            return Ok(());
        }
        match FileDirectiveType::try_from(raw_pdu[header_len]) {
            Ok(FileDirectiveType::MetadataPdu) => {
                let metadata_pdu = MetadataPdu::from_bytes(raw_pdu)?;
                self.handle_metadata(&metadata_pdu, vfs, sender)?;
            }
            Ok(FileDirectiveType::EofPdu) => {
                let eof_pdu = EofPdu::from_bytes(raw_pdu)?;
                self.handle_eof(&eof_pdu, vfs, sender, user, timer_creator)?;
            }
            // All other directives are tolerated and ignored so that unknown or unsupported
            // directives do not terminate the transaction.
            _ => (),
        }
        Ok(())
    }

    /// Service the transaction timers. A tick on a terminal transaction is discarded.
    pub fn check_timers(
        &mut self,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
    ) -> Result<(), DestError> {
        if self.state != TransactionState::Active {
            return Ok(());
        }
        if self.inactivity_timer.has_expired() {
            self.complete(false, ConditionCode::InactivityDetected);
            return Ok(());
        }
        if self.eof_received {
            let expired = self
                .nak_timer
                .as_ref()
                .map(|timer| timer.has_expired())
                .unwrap_or(false);
            if expired {
                if let Some(timer) = &mut self.nak_timer {
                    timer.reset();
                }
                self.attempt_completion(vfs, sender)?;
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

    pub fn suspend(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Suspended;
        }
    }

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
            bytes_transferred: self.bytes_received,
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

    fn handle_metadata(
        &mut self,
        metadata_pdu: &MetadataPdu,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
    ) -> Result<(), DestError> {
        let params = metadata_pdu.metadata_params();
        self.closure_requested = params.closure_requested;
        self.checksum_type = params.checksum_type;
        // The file size of an already received EOF PDU takes precedence.
        if !self.eof_received {
            self.file_size = params.file_size;
        }
        self.source_file = metadata_pdu
            .src_file_name()
            .value_as_str()
            .and_then(|name| name.ok())
            .map(|name| name.to_string());
        self.dest_file = metadata_pdu
            .dest_file_name()
            .value_as_str()
            .and_then(|name| name.ok())
            .map(|name| name.to_string());
        self.metadata_received = true;
        // Metadata may arrive after the EOF PDU, re-evaluate in that case.
        if self.eof_received {
            self.attempt_completion(vfs, sender)?;
        }
        Ok(())
    }

    fn handle_file_data(
        &mut self,
        file_data_pdu: &FileDataPdu,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
    ) -> Result<(), DestError> {
        self.segments
            .insert(file_data_pdu.offset(), file_data_pdu.file_data().to_vec());
        self.bytes_received += file_data_pdu.file_data().len() as u64;
        // Segments arriving after the EOF PDU are retransmissions, re-evaluate.
        if self.eof_received {
            self.attempt_completion(vfs, sender)?;
        }
        Ok(())
    }

    fn handle_eof(
        &mut self,
        eof_pdu: &EofPdu,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
        user: &mut impl CfdpUser,
        timer_creator: &impl TimerCreatorProvider<Countdown = Countdown>,
    ) -> Result<(), DestError> {
        if eof_pdu.condition_code() != ConditionCode::NoError {
            // The sending entity cancelled the transaction.
            self.complete(false, eof_pdu.condition_code());
            return Ok(());
        }
        self.expected_checksum = eof_pdu.file_checksum();
        // The EOF file size takes precedence over the value cached from the Metadata PDU.
        self.file_size = eof_pdu.file_size();
        self.eof_received = true;
        user.eof_recvd_indication(&self.id);
        if self.transmission_mode == TransmissionMode::Acknowledged {
            self.send_eof_ack(sender, eof_pdu.condition_code())?;
            if self.nak_timer.is_none() {
                self.nak_timer =
                    Some(timer_creator.create_countdown(TimerContext::NakActivity {
                        expiry_time: self.nak_timeout,
                    }));
            }
        }
        self.attempt_completion(vfs, sender)
    }

    /// Run one completion attempt as triggered by an EOF PDU, a retransmitted segment, late
    /// metadata or a NAK activity timer expiry.
    fn attempt_completion(
        &mut self,
        vfs: &impl VirtualFilestore,
        sender: &impl PduSendProvider,
    ) -> Result<(), DestError> {
        let gaps = self.segments.gaps(self.file_size);
        if self.transmission_mode == TransmissionMode::Acknowledged
            && (!gaps.is_empty() || !self.metadata_received)
        {
            return self.send_nak(sender, &gaps);
        }
        if !self.metadata_received {
            // Without metadata there is no destination file name to commit to.
            self.complete(false, ConditionCode::InvalidFileStructure);
            return Ok(());
        }
        if !gaps.is_empty() {
            self.complete(false, ConditionCode::FileSizeError);
            return Ok(());
        }
        let assembled = match self.segments.assemble(self.file_size) {
            Ok(assembled) => assembled,
            Err(_) => {
                self.complete(false, ConditionCode::FileSizeError);
                return Ok(());
            }
        };
        if self.checksum_type != ChecksumType::NullChecksum {
            let calculated = calculate_checksum(&assembled, self.checksum_type);
            if calculated != self.expected_checksum {
                self.complete(false, ConditionCode::FileChecksumFailure);
                return Ok(());
            }
        }
        // The file name presence was checked together with the metadata flag.
        let dest_file = self.dest_file.clone().unwrap_or_default();
        if vfs.write_all(&dest_file, &assembled).is_err() {
            self.complete(false, ConditionCode::FilestoreRejection);
            return Ok(());
        }
        self.file_status = FileStatus::RetainedSuccessfully;
        if self.transmission_mode == TransmissionMode::Acknowledged || self.closure_requested {
            self.send_finished(sender)?;
        }
        self.complete(true, ConditionCode::NoError);
        Ok(())
    }

    fn send_nak(
        &mut self,
        sender: &impl PduSendProvider,
        gaps: &[(u64, u64)],
    ) -> Result<(), DestError> {
        // Forward progress since the last attempt resets the retry counter.
        if let Some(last_gap_count) = self.last_gap_count {
            if gaps.len() < last_gap_count {
                self.nak_retries = 0;
            }
        }
        self.last_gap_count = Some(gaps.len());

        let mut segment_requests: Vec<(u64, u64)> = Vec::with_capacity(gaps.len() + 1);
        if !self.metadata_received {
            // The (0, 0) segment request asks for a Metadata PDU retransmission.
            segment_requests.push((0, 0));
        }
        segment_requests.extend_from_slice(gaps);
        let nak_pdu = NakPduCreator::new(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            0,
            self.file_size,
            &segment_requests,
        )?;
        self.send_pdu(sender, &nak_pdu)?;
        self.nak_retries += 1;
        if self.nak_retries > self.max_nak_retries {
            self.complete(false, ConditionCode::NakLimitReached);
        }
        Ok(())
    }

    fn send_eof_ack(
        &mut self,
        sender: &impl PduSendProvider,
        condition_code: ConditionCode,
    ) -> Result<(), DestError> {
        let ack_pdu = AckPdu::new_for_eof_pdu(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            condition_code,
            TransactionStatus::Active,
        );
        self.send_pdu(sender, &ack_pdu)
    }

    fn send_finished(&mut self, sender: &impl PduSendProvider) -> Result<(), DestError> {
        let finished_pdu = FinishedPdu::new_default(
            PduHeader::new_for_file_directive(self.pdu_conf, 0),
            FileStatus::RetainedSuccessfully,
        );
        self.send_pdu(sender, &finished_pdu)
    }

    fn send_pdu(
        &self,
        sender: &impl PduSendProvider,
        pdu: &impl WritablePduPacket,
    ) -> Result<(), DestError> {
        let raw_pdu = pdu.to_vec()?;
        sender.send_pdu(self.pdu_conf.source_id().value(), &raw_pdu)?;
        Ok(())
    }
}
