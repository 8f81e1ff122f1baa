//! End-to-end integration tests which wire two CFDP entity engines together through mpsc
//! channels acting as the transport.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cfdp_core::{
    entity::EntityEngine,
    filestore::{NativeFilestore, VirtualFilestore},
    pdu::{ChecksumType, PduHeader, PduType, TransmissionMode},
    request::PutRequestOwned,
    time::{StdCountdown, StdTimerCreator},
    util::UnsignedByteField,
    CfdpUser, EntityType, LocalEntityConfig, PduOwnedWithDest, RemoteEntityConfig,
    RemoteEntityConfigProvider, StdRemoteEntityConfigProvider, TransactionFinishedParams,
    TransactionId,
};

const LOCAL_ID: u64 = 1;
const REMOTE_ID: u64 = 2;

const FILE_DATA: &str = "Hello World!";

type TestEngine = EntityEngine<
    mpsc::Sender<PduOwnedWithDest>,
    NativeFilestore,
    StdRemoteEntityConfigProvider,
    StdTimerCreator,
    StdCountdown,
>;

pub struct ExampleCfdpUser {
    entity_type: EntityType,
    completion_signal: Arc<AtomicBool>,
}

impl ExampleCfdpUser {
    pub fn new(entity_type: EntityType, completion_signal: Arc<AtomicBool>) -> Self {
        Self {
            entity_type,
            completion_signal,
        }
    }
}

impl CfdpUser for ExampleCfdpUser {
    fn transaction_indication(&mut self, id: &TransactionId) {
        println!(
            "{:?} entity: transaction indication for {:?}",
            self.entity_type, id
        );
    }

    fn eof_sent_indication(&mut self, id: &TransactionId) {
        println!(
            "{:?} entity: EOF sent for transaction {:?}",
            self.entity_type, id
        );
    }

    fn eof_recvd_indication(&mut self, id: &TransactionId) {
        println!(
            "{:?} entity: EOF received for transaction {:?}",
            self.entity_type, id
        );
    }

    fn transaction_finished_indication(&mut self, params: &TransactionFinishedParams) {
        println!(
            "{:?} entity: transaction finished: {:?}",
            self.entity_type, params
        );
        assert!(params.result.success);
        self.completion_signal.store(true, Ordering::Relaxed);
    }
}

fn build_engine(
    id: u64,
    peer_id: u64,
    transmission_mode: TransmissionMode,
    tx: mpsc::Sender<PduOwnedWithDest>,
    filestore_root: &std::path::Path,
) -> TestEngine {
    let mut local_cfg = LocalEntityConfig::new_with_default_values(UnsignedByteField::new(2, id));
    // Small segments so the test file spans multiple file data PDUs.
    local_cfg.max_file_segment_len = 5;
    let mut remote_cfg_table = StdRemoteEntityConfigProvider::default();
    remote_cfg_table.add_config(&RemoteEntityConfig::new_with_default_values(
        UnsignedByteField::new(2, peer_id),
        transmission_mode,
        ChecksumType::Crc32,
    ));
    EntityEngine::new(
        local_cfg,
        remote_cfg_table,
        tx,
        NativeFilestore::new(filestore_root),
        StdTimerCreator::default(),
    )
}

/// Runs a full file copy operation between two engines on separate threads.
///
/// The `drop_one_file_data` flag makes the inbound thread of the destination entity discard
/// the second file data PDU once, which exercises the NAK driven recovery path of the
/// acknowledged mode.
fn end_to_end_test(
    transmission_mode: TransmissionMode,
    closure_requested: bool,
    drop_one_file_data: bool,
) {
    let stop_signal_source = Arc::new(AtomicBool::new(false));
    let stop_signal_dest = stop_signal_source.clone();
    let stop_signal_ctrl = stop_signal_source.clone();

    let completion_signal_source = Arc::new(AtomicBool::new(false));
    let completion_signal_source_main = completion_signal_source.clone();
    let completion_signal_dest = Arc::new(AtomicBool::new(false));
    let completion_signal_dest_main = completion_signal_dest.clone();

    let srcdir = tempfile::tempdir().expect("creating source temp directory failed");
    let destdir = tempfile::tempdir().expect("creating dest temp directory failed");
    let src_filestore = NativeFilestore::new(srcdir.path());
    src_filestore
        .write_all("src.txt", FILE_DATA.as_bytes())
        .expect("writing source file failed");
    let dest_filestore = NativeFilestore::new(destdir.path());

    let (source_tx, source_rx) = mpsc::channel::<PduOwnedWithDest>();
    let (dest_tx, dest_rx) = mpsc::channel::<PduOwnedWithDest>();

    let source_engine = build_engine(
        LOCAL_ID,
        REMOTE_ID,
        transmission_mode,
        source_tx,
        srcdir.path(),
    );
    let dest_engine = build_engine(
        REMOTE_ID,
        LOCAL_ID,
        transmission_mode,
        dest_tx,
        destdir.path(),
    );

    let put_request = PutRequestOwned::new(
        UnsignedByteField::new(2, REMOTE_ID),
        "src.txt",
        "nested/dest.txt",
        Some(transmission_mode),
        None,
        closure_requested,
    )
    .expect("put request creation failed");

    let start = std::time::Instant::now();

    let jh_source = thread::spawn(move || {
        let mut cfdp_user =
            ExampleCfdpUser::new(EntityType::Sending, completion_signal_source);
        source_engine
            .put(&mut cfdp_user, &put_request)
            .expect("put request failed");
        loop {
            match dest_rx.try_recv() {
                Ok(pdu_with_dest) => {
                    if let Err(e) = source_engine.process_pdu(&mut cfdp_user, &pdu_with_dest.pdu)
                    {
                        println!("source entity error: {}", e);
                    }
                }
                Err(mpsc::TryRecvError::Empty) => thread::sleep(Duration::from_millis(20)),
                Err(mpsc::TryRecvError::Disconnected) => {
                    panic!("unexpected disconnect from destination channel sender");
                }
            }
            source_engine
                .check_timers(&mut cfdp_user)
                .expect("source timer check failed");
            if stop_signal_source.load(Ordering::Relaxed) {
                break;
            }
        }
    });

    let jh_dest = thread::spawn(move || {
        let mut cfdp_user = ExampleCfdpUser::new(EntityType::Receiving, completion_signal_dest);
        let mut file_data_count = 0;
        let mut dropped = false;
        loop {
            match source_rx.try_recv() {
                Ok(pdu_with_dest) => {
                    let mut discard = false;
                    if drop_one_file_data {
                        if let Ok((header, _)) = PduHeader::from_bytes(&pdu_with_dest.pdu) {
                            if header.pdu_type() == PduType::FileData {
                                file_data_count += 1;
                                if file_data_count == 2 && !dropped {
                                    dropped = true;
                                    discard = true;
                                }
                            }
                        }
                    }
                    if !discard {
                        if let Err(e) =
                            dest_engine.process_pdu(&mut cfdp_user, &pdu_with_dest.pdu)
                        {
                            println!("dest entity error: {}", e);
                        }
                    }
                }
                Err(mpsc::TryRecvError::Empty) => thread::sleep(Duration::from_millis(20)),
                Err(mpsc::TryRecvError::Disconnected) => {
                    panic!("unexpected disconnect from source channel sender");
                }
            }
            dest_engine
                .check_timers(&mut cfdp_user)
                .expect("dest timer check failed");
            if stop_signal_dest.load(Ordering::Relaxed) {
                break;
            }
        }
    });

    loop {
        if completion_signal_source_main.load(Ordering::Relaxed)
            && completion_signal_dest_main.load(Ordering::Relaxed)
        {
            let copied = dest_filestore
                .read_all("nested/dest.txt")
                .expect("reading destination file failed");
            assert_eq!(copied, FILE_DATA.as_bytes());
            // Stop the threads gracefully.
            stop_signal_ctrl.store(true, Ordering::Relaxed);
            break;
        }
        if std::time::Instant::now() - start > Duration::from_secs(5) {
            panic!("file transfer not finished in 5 seconds");
        }
        thread::sleep(Duration::from_millis(20));
    }

    jh_source.join().unwrap();
    jh_dest.join().unwrap();
}

#[test]
fn end_to_end_test_unacknowledged_no_closure() {
    end_to_end_test(TransmissionMode::Unacknowledged, false, false);
}

#[test]
fn end_to_end_test_unacknowledged_with_closure() {
    end_to_end_test(TransmissionMode::Unacknowledged, true, false);
}

#[test]
fn end_to_end_test_acknowledged() {
    end_to_end_test(TransmissionMode::Acknowledged, false, false);
}

#[test]
fn end_to_end_test_acknowledged_with_packet_loss() {
    end_to_end_test(TransmissionMode::Acknowledged, false, true);
}
