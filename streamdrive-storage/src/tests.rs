use crate::backend::{
    AsyncReadBackend, ImmediateBackend, IssueFailure, NativeCompletion, NativeFile, NativeRead,
    OpenFlags,
};
use crate::{
    CancelOutcome, CompletedRequest, Completion, DriveStatus, FailureKind, ParentLink,
    PendingEstimate, ReadRequest, RequestId, RequestOutput, RequestPath, RequestSender,
    StorageDrive, StorageDriveConfig,
};
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Controls when the gated backend lets reads complete
#[derive(Default)]
struct Gate {
    released: AtomicUsize,
    opens: AtomicUsize,
    max_outstanding: AtomicUsize,
}

impl Gate {
    fn release(
        &self,
        count: usize,
    ) {
        self.released.fetch_add(count, Ordering::SeqCst);
    }

    fn open_fully(&self) {
        self.release(usize::MAX / 2);
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

// Reads synchronously but only reports a read once the gate releases it, oldest first
struct GatedBackend {
    inner: ImmediateBackend,
    held: VecDeque<NativeCompletion>,
    gate: Arc<Gate>,
}

impl AsyncReadBackend for GatedBackend {
    fn open(
        &mut self,
        path: &Path,
        flags: OpenFlags,
    ) -> std::io::Result<NativeFile> {
        self.gate.opens.fetch_add(1, Ordering::SeqCst);
        NativeFile::open(path, flags)
    }

    fn issue_read(
        &mut self,
        read: NativeRead,
    ) -> Result<(), IssueFailure> {
        self.inner.issue_read(read)?;
        let mut finished = Vec::default();
        self.inner.poll_completions(&mut finished);
        self.held.extend(finished);
        self.gate
            .max_outstanding
            .fetch_max(self.held.len(), Ordering::SeqCst);
        Ok(())
    }

    fn poll_completions(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        while !self.held.is_empty() {
            let permit = self
                .gate
                .released
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if permit.is_err() {
                break;
            }
            completions.extend(self.held.pop_front());
        }
    }

    fn cancel(
        &mut self,
        slot: usize,
    ) {
        for completion in &mut self.held {
            if completion.slot == slot {
                completion.canceled = true;
            }
        }
    }

    fn wait_for_all(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    ) {
        completions.extend(self.held.drain(..));
    }

    fn outstanding(&self) -> usize {
        self.held.len()
    }
}

struct TestDrive {
    drive: StorageDrive,
    sender: RequestSender,
    completion_rx: Receiver<CompletedRequest>,
    gate: Arc<Gate>,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestDrive {
    fn new(
        files: &[(&str, Vec<u8>)],
        configure: impl FnOnce(&mut StorageDriveConfig),
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }

        let mut config = StorageDriveConfig::single_drive("data", dir.path());
        configure(&mut config);

        let gate = Arc::new(Gate::default());
        let backend = GatedBackend {
            inner: ImmediateBackend::new(),
            held: VecDeque::default(),
            gate: gate.clone(),
        };

        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let drive = StorageDrive::new(config, Box::new(backend), completion_tx).unwrap();
        let sender = drive.request_sender();
        let root = dunce::canonicalize(dir.path()).unwrap();

        TestDrive {
            drive,
            sender,
            completion_rx,
            gate,
            root,
            _dir: dir,
        }
    }

    fn read(
        &self,
        name: &str,
        offset: u64,
        size: u64,
    ) -> RequestId {
        self.sender
            .read(
                ParentLink(offset),
                ReadRequest::new(RequestPath::drive("data", name), offset, size),
            )
            .unwrap()
    }

    fn completions(&self) -> Vec<CompletedRequest> {
        self.completion_rx.try_iter().collect()
    }

    fn status(&self) -> DriveStatus {
        let mut status = DriveStatus::default();
        self.drive.update_status(&mut status);
        status
    }

    // Lets every read through and ticks until the expected number of completions arrive
    fn run_until(
        &mut self,
        count: usize,
    ) -> Vec<CompletedRequest> {
        self.gate.open_fully();
        let mut completions = Vec::default();
        for _ in 0..100 {
            self.drive.execute_requests();
            completions.extend(self.completion_rx.try_iter());
            if completions.len() >= count {
                break;
            }
        }

        assert_eq!(completions.len(), count);
        completions
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 251) as u8).collect()
}

fn bytes_read(completed: &CompletedRequest) -> u64 {
    match &completed.completion {
        Completion::Success(RequestOutput::Read { bytes_read }) => *bytes_read,
        other => panic!("Expected a successful read, got {:?}", other),
    }
}

#[test]
fn reads_are_bounded_by_io_channels() {
    let contents = patterned(100);
    let mut test = TestDrive::new(&[("file.bin", contents.clone())], |config| {
        config.io_channel_count = 2;
        config.over_commit = 0;
    });

    let ids: Vec<RequestId> = (0..5).map(|i| test.read("file.bin", i * 20, 20)).collect();

    assert!(test.drive.execute_requests());
    let status = test.status();
    assert_eq!(status.active_reads, 2);
    assert_eq!(status.pending_reads, 3);
    assert_eq!(status.queue_depth, 5);
    assert_eq!(status.active_bytes, 40);
    assert!(status.busy);
    assert!(test.completions().is_empty());

    let mut completed = Vec::default();
    for expected_pending in [2, 1, 0, 0, 0] {
        test.gate.release(1);
        test.drive.execute_requests();
        let mut tick_completions = test.completions();
        assert_eq!(tick_completions.len(), 1);
        completed.append(&mut tick_completions);
        assert_eq!(test.status().pending_reads, expected_pending);
    }

    assert!(!test.status().busy);
    assert!(test.gate.max_outstanding.load(Ordering::SeqCst) <= 2);

    // Same priority reads finish in the order they were submitted
    let completed_ids: Vec<RequestId> = completed.iter().map(|c| c.id).collect();
    assert_eq!(completed_ids, ids);
    for (i, completion) in completed.iter().enumerate() {
        assert_eq!(bytes_read(completion), 20);
        assert_eq!(completion.parent, ParentLink(i as u64 * 20));
        let buffer = completion.buffer.as_ref().unwrap();
        assert_eq!(&buffer[..20], &contents[i * 20..i * 20 + 20]);
    }

    // Every read shared one handle
    assert_eq!(test.gate.opens(), 1);
    assert_eq!(test.drive.statistics().reads_completed, 5);
}

#[test]
fn exists_for_unseen_path_completes_in_one_tick() {
    let mut test = TestDrive::new(&[("file.bin", patterned(64))], |_| {});
    let path = test.root.join("file.bin");
    assert!(test.drive.metadata_cache().find(&path).is_none());

    let id = test
        .sender
        .exists(ParentLink(7), RequestPath::drive("data", "file.bin"))
        .unwrap();
    test.drive.execute_requests();

    let completions = test.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].id, id);
    assert_eq!(completions[0].parent, ParentLink(7));
    assert!(completions[0].buffer.is_none());
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::Exists(true))
    ));
    assert_eq!(test.gate.opens(), 1);
    assert_eq!(test.drive.metadata_cache().get(&path), Some(64));

    // Served from the cache from now on
    test.sender
        .metadata(ParentLink(8), RequestPath::drive("data", "file.bin"))
        .unwrap();
    test.drive.execute_requests();
    let completions = test.completions();
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::MetaData(Some(64)))
    ));
    assert_eq!(test.gate.opens(), 1);
    assert_eq!(test.drive.statistics().metadata_cache_hits, 1);
}

#[test]
fn missing_files_are_reported_per_request() {
    let mut test = TestDrive::new(&[("file.bin", patterned(8))], |_| {});

    test.sender
        .exists(ParentLink(1), RequestPath::drive("data", "missing.bin"))
        .unwrap();
    test.sender
        .metadata(ParentLink(2), RequestPath::drive("data", "missing.bin"))
        .unwrap();
    test.read("missing.bin", 0, 8);
    test.sender
        .exists(ParentLink(4), RequestPath::drive("nowhere", "file.bin"))
        .unwrap();

    let completions = test.run_until(4);
    let by_parent = |parent: u64| {
        completions
            .iter()
            .find(|c| c.parent == ParentLink(parent))
            .unwrap()
    };

    assert!(matches!(
        by_parent(1).completion,
        Completion::Success(RequestOutput::Exists(false))
    ));
    assert!(matches!(
        by_parent(2).completion,
        Completion::Success(RequestOutput::MetaData(None))
    ));
    // Reads use their offset as the parent link
    assert!(matches!(
        by_parent(0).completion,
        Completion::Failure(FailureKind::NotFound)
    ));
    assert!(by_parent(0).buffer.is_some());
    assert!(matches!(
        by_parent(4).completion,
        Completion::Failure(FailureKind::UnknownDrive)
    ));

    // Missing files are not cached, and the drive keeps working
    assert!(test.drive.metadata_cache().is_empty());
    test.read("file.bin", 0, 8);
    let completions = test.run_until(1);
    assert_eq!(bytes_read(&completions[0]), 8);
}

#[test]
fn flush_evicts_both_caches() {
    let mut test = TestDrive::new(&[("file.bin", patterned(32))], |_| {});
    let path = test.root.join("file.bin");

    test.read("file.bin", 0, 32);
    test.run_until(1);
    assert_eq!(test.gate.opens(), 1);
    assert!(test.drive.file_handle_cache().find(&path).is_some());
    assert_eq!(test.drive.metadata_cache().get(&path), Some(32));

    test.sender
        .flush(ParentLink(0), RequestPath::drive("data", "file.bin"))
        .unwrap();
    let completions = test.run_until(1);
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::Flushed)
    ));
    assert!(test.drive.file_handle_cache().find(&path).is_none());
    assert!(test.drive.metadata_cache().find(&path).is_none());

    // Next read opens the file again
    test.read("file.bin", 0, 32);
    test.run_until(1);
    assert_eq!(test.gate.opens(), 2);
}

#[test]
fn busy_file_handles_are_never_evicted() {
    let mut test = TestDrive::new(
        &[
            ("a.bin", patterned(16)),
            ("b.bin", patterned(16)),
            ("c.bin", patterned(16)),
        ],
        |config| {
            config.max_cached_file_handles = 2;
            config.io_channel_count = 4;
        },
    );
    let a = test.root.join("a.bin");
    let b = test.root.join("b.bin");
    let c = test.root.join("c.bin");

    test.read("a.bin", 0, 16);
    test.read("b.bin", 0, 16);
    test.read("c.bin", 0, 16);
    test.drive.execute_requests();

    // Both handles are busy so the third read waits instead of closing one
    let status = test.status();
    assert_eq!(status.active_reads, 2);
    assert_eq!(status.pending_reads, 1);
    assert!(test.drive.file_handle_cache().find(&a).is_some());
    assert!(test.drive.file_handle_cache().find(&b).is_some());
    assert!(test.drive.statistics().reads_deferred >= 1);

    // Once "a" finishes its handle is recycled for "c"
    test.gate.release(1);
    test.drive.execute_requests();
    assert_eq!(test.completions().len(), 1);
    assert!(test.drive.file_handle_cache().find(&a).is_none());
    assert!(test.drive.file_handle_cache().find(&c).is_some());
    assert_eq!(test.status().active_reads, 2);

    let completions = test.run_until(2);
    for completion in &completions {
        assert_eq!(bytes_read(completion), 16);
    }
}

#[test]
fn cancel_pending_in_flight_and_completed_reads() {
    let mut test = TestDrive::new(&[("file.bin", patterned(64))], |config| {
        config.io_channel_count = 1;
    });

    let first = test.read("file.bin", 0, 32);
    let second = test.read("file.bin", 32, 32);
    test.drive.execute_requests();
    assert_eq!(test.status().active_reads, 1);
    assert_eq!(test.status().pending_reads, 1);

    // Still queued: removed, and its buffer comes back with the cancel
    let cancel_second = test.sender.cancel(ParentLink(0), second).unwrap();
    test.drive.execute_requests();
    let completions = test.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].id, cancel_second);
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::Cancel(CancelOutcome::Removed))
    ));
    assert!(completions[0].buffer.is_some());
    assert_eq!(test.status().pending_reads, 0);

    // In flight: flagged, then completes exactly once as canceled
    test.sender.cancel(ParentLink(0), first).unwrap();
    test.drive.execute_requests();
    let completions = test.completions();
    assert_eq!(completions.len(), 1);
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::Cancel(CancelOutcome::Flagged))
    ));

    let completions = test.run_until(1);
    assert_eq!(completions[0].id, first);
    assert!(matches!(completions[0].completion, Completion::Canceled));
    assert!(completions[0].buffer.is_some());

    // Already complete: nothing happens
    test.sender.cancel(ParentLink(0), first).unwrap();
    let completions = test.run_until(1);
    assert!(matches!(
        completions[0].completion,
        Completion::Success(RequestOutput::Cancel(CancelOutcome::NotFound))
    ));
    assert!(test.completions().is_empty());
    assert!(!test.status().busy);
    assert_eq!(test.drive.statistics().reads_canceled, 2);
}

#[test]
fn misaligned_unbuffered_reads_match_buffered_reads() {
    let contents = patterned(3000);
    let mut test = TestDrive::new(&[("file.bin", contents.clone())], |config| {
        config.flags.enable_unbuffered_reads = true;
        config.physical_sector_size = 4096;
    });

    let middle = test.read("file.bin", 100, 1000);
    let tail = test.read("file.bin", 2900, 500);
    let at_end = test.read("file.bin", 3000, 10);
    let past_end = test.read("file.bin", 3001, 10);

    let completions = test.run_until(4);
    let find = |id: RequestId| completions.iter().find(|c| c.id == id).unwrap();

    let completed = find(middle);
    assert_eq!(bytes_read(completed), 1000);
    assert_eq!(&completed.buffer.as_ref().unwrap()[..1000], &contents[100..1100]);

    // Cut short at the end of the file
    let completed = find(tail);
    assert_eq!(bytes_read(completed), 100);
    assert_eq!(&completed.buffer.as_ref().unwrap()[..100], &contents[2900..3000]);

    assert_eq!(bytes_read(find(at_end)), 0);
    assert!(matches!(
        find(past_end).completion,
        Completion::Failure(FailureKind::OutOfRange)
    ));
}

#[test]
fn caller_buffer_is_reused() {
    let contents = patterned(64);
    let mut test = TestDrive::new(&[("file.bin", contents.clone())], |_| {});

    let buffer = vec![0xFFu8; 128];
    test.sender
        .read(
            ParentLink(0),
            ReadRequest::new(RequestPath::drive("data", "file.bin"), 0, 64).with_buffer(buffer),
        )
        .unwrap();

    let completions = test.run_until(1);
    let buffer = completions[0].buffer.as_ref().unwrap();
    assert_eq!(buffer.len(), 128);
    assert_eq!(&buffer[..64], &contents[..]);
}

#[test]
fn report_collects_statistics() {
    let mut test = TestDrive::new(&[("file.bin", patterned(64))], |_| {});
    test.read("file.bin", 0, 64);
    test.run_until(1);

    test.sender.report(ParentLink(0)).unwrap();
    let completions = test.run_until(1);
    let statistics = match &completions[0].completion {
        Completion::Success(RequestOutput::Statistics(statistics)) => statistics,
        other => panic!("Expected statistics, got {:?}", other),
    };

    let value = |name: &str| {
        statistics
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value)
    };
    assert!(value("open_time_ms").is_some());
    assert!(value("read_time_ms").is_some());
    assert_eq!(value("read_size_bytes"), Some(64.0));
    assert_eq!(value("reads_completed"), Some(1.0));
    assert_eq!(value("active_bytes"), Some(0.0));
    // No exists requests yet, so no average
    assert!(value("exists_time_ms").is_none());
}

#[test]
fn minimal_reporting_skips_counters() {
    let mut test = TestDrive::new(&[("file.bin", patterned(64))], |config| {
        config.flags.minimal_reporting = true;
    });
    test.read("file.bin", 0, 64);
    test.run_until(1);

    let mut statistics = Vec::default();
    test.drive.collect_statistics(&mut statistics);
    assert!(statistics.iter().any(|s| s.name == "read_time_ms"));
    assert!(!statistics.iter().any(|s| s.name == "reads_completed"));
}

#[test]
fn completion_estimates_cover_own_and_upstream_reads() {
    let mut test = TestDrive::new(&[("file.bin", patterned(4096))], |config| {
        config.io_channel_count = 1;
        config.flags.has_seek_penalty = true;
    });

    let first = test.read("file.bin", 0, 1024);
    let second = test.read("file.bin", 2048, 1024);
    let deadline = Instant::now();
    let third = test
        .sender
        .read(
            ParentLink(0),
            ReadRequest::new(RequestPath::drive("data", "file.bin"), 1024, 1024)
                .with_deadline(deadline),
        )
        .unwrap();
    test.drive.execute_requests();

    let now = Instant::now();
    let mut upstream = vec![PendingEstimate::new(test.root.join("file.bin"), 0, 4096)];
    test.drive.update_completion_estimates(now, &mut upstream);

    let first_estimate = test.drive.estimated_completion(first).unwrap();
    let second_estimate = test.drive.estimated_completion(second).unwrap();
    let third_estimate = test.drive.estimated_completion(third).unwrap();
    let upstream_estimate = upstream[0].estimated_completion.unwrap();
    assert!(first_estimate >= now);
    assert!(second_estimate >= first_estimate);
    assert!(third_estimate >= second_estimate);
    assert!(upstream_estimate >= third_estimate);

    // The third read can't make its deadline. Only counted once however often estimates run.
    assert_eq!(test.drive.statistics().deadline_misses, 1);
    test.drive.update_completion_estimates(Instant::now(), &mut upstream);
    assert_eq!(test.drive.statistics().deadline_misses, 1);

    test.run_until(3);
    assert!(test.drive.estimated_completion(first).is_none());
}

#[test]
fn estimates_tolerate_reads_at_the_end_of_the_address_space() {
    let mut test = TestDrive::new(&[("file.bin", patterned(100))], |config| {
        config.io_channel_count = 1;
        config.flags.has_seek_penalty = true;
    });

    let first = test.read("file.bin", 0, 16);
    let far = test.read("file.bin", u64::MAX - 4, 16);
    test.drive.execute_requests();
    assert_eq!(test.status().active_reads, 1);
    assert_eq!(test.status().pending_reads, 1);

    let now = Instant::now();
    let mut upstream = vec![
        PendingEstimate::new(test.root.join("file.bin"), u64::MAX - 2, 16),
        PendingEstimate::new(test.root.join("file.bin"), 0, 16),
    ];
    test.drive.update_completion_estimates(now, &mut upstream);

    let first_estimate = test.drive.estimated_completion(first).unwrap();
    let far_estimate = test.drive.estimated_completion(far).unwrap();
    assert!(far_estimate >= first_estimate);
    assert!(upstream[0].estimated_completion.unwrap() >= far_estimate);
    assert!(upstream[1].estimated_completion.unwrap() >= upstream[0].estimated_completion.unwrap());

    // Once dispatched the far read fails on its own without disturbing the other
    let completions = test.run_until(2);
    let far_completion = completions.iter().find(|c| c.id == far).unwrap();
    assert!(matches!(
        far_completion.completion,
        Completion::Failure(FailureKind::OutOfRange)
    ));
    let first_completion = completions.iter().find(|c| c.id == first).unwrap();
    assert_eq!(bytes_read(first_completion), 16);
}

#[test]
fn status_reports_over_commit_budget() {
    let mut test = TestDrive::new(&[("file.bin", patterned(120))], |config| {
        config.io_channel_count = 2;
        config.over_commit = 3;
    });
    assert_eq!(test.status().available_slots, 5);

    for i in 0..6 {
        test.read("file.bin", i * 20, 20);
    }
    test.drive.execute_requests();

    // Native concurrency stays at the slot count, the budget reflects the over-commit
    let status = test.status();
    assert_eq!(status.active_reads, 2);
    assert_eq!(status.pending_reads, 4);
    assert_eq!(status.available_slots, 2 + 3 - 2 - 4);

    test.run_until(6);
    assert_eq!(test.status().available_slots, 5);
}

#[test]
fn negative_over_commit_holds_back_dispatch() {
    let mut test = TestDrive::new(&[("file.bin", patterned(60))], |config| {
        config.io_channel_count = 2;
        config.over_commit = -1;
    });
    assert_eq!(test.status().available_slots, 1);

    for i in 0..3 {
        test.read("file.bin", i * 20, 20);
    }
    test.drive.execute_requests();

    let status = test.status();
    assert_eq!(status.active_reads, 1);
    assert_eq!(status.pending_reads, 2);
    assert_eq!(status.available_slots, 2 - 1 - 1 - 2);

    test.run_until(3);
    assert!(test.gate.max_outstanding.load(Ordering::SeqCst) <= 1);
}

#[test]
fn dropping_drive_cancels_everything_outstanding() {
    let mut test = TestDrive::new(&[("file.bin", patterned(64))], |config| {
        config.io_channel_count = 1;
    });

    let ids: Vec<RequestId> = (0..3).map(|i| test.read("file.bin", i * 16, 16)).collect();
    test.drive.execute_requests();
    assert_eq!(test.status().active_reads, 1);

    let TestDrive {
        drive,
        sender,
        completion_rx,
        _dir,
        ..
    } = test;
    drop(drive);

    let completions: Vec<CompletedRequest> = completion_rx.try_iter().collect();
    assert_eq!(completions.len(), 3);
    for id in ids {
        let completed = completions.iter().find(|c| c.id == id).unwrap();
        assert!(matches!(completed.completion, Completion::Canceled));
        assert!(completed.buffer.is_some());
    }

    // Requests sent after the drive is gone are handed back
    assert!(sender
        .exists(ParentLink(0), RequestPath::drive("data", "file.bin"))
        .is_err());
}

#[test]
fn threaded_backend_completes_every_request_exactly_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..4).map(|i| format!("file_{}.bin", i)).collect();
    for (i, name) in names.iter().enumerate() {
        std::fs::write(dir.path().join(name), patterned(1000 + i * 100)).unwrap();
    }

    let mut config = StorageDriveConfig::single_drive("data", dir.path());
    config.io_channel_count = 3;
    config.over_commit = 1;
    let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
    let mut drive = StorageDrive::new_threaded(config, completion_tx).unwrap();

    // Submit from another thread
    let sender = drive.request_sender();
    let submit_names = names.clone();
    let submitter = std::thread::spawn(move || {
        let mut ids = Vec::default();
        for round in 0..5u64 {
            for name in &submit_names {
                let path = RequestPath::drive("data", name.as_str());
                ids.push(
                    sender
                        .read(ParentLink(round), ReadRequest::new(path.clone(), round * 100, 100))
                        .unwrap(),
                );
                ids.push(sender.exists(ParentLink(round), path).unwrap());
            }
        }
        ids
    });
    let ids = submitter.join().unwrap();

    let mut completions = Vec::default();
    let give_up = Instant::now() + Duration::from_secs(10);
    while completions.len() < ids.len() && Instant::now() < give_up {
        if !drive.execute_requests() {
            std::thread::sleep(Duration::from_millis(1));
        }
        completions.extend(completion_rx.try_iter());
    }

    assert_eq!(completions.len(), ids.len());
    for id in &ids {
        let matching = completions.iter().filter(|c| c.id == *id).count();
        assert_eq!(matching, 1);
    }
    for completion in &completions {
        assert!(completion.completion.is_success());
    }

    let mut status = DriveStatus::default();
    drive.update_status(&mut status);
    assert!(!status.busy);
    assert_eq!(drive.statistics().reads_completed, 20);
}
