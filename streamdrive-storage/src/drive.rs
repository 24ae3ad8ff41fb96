use crate::backend::{AsyncReadBackend, OpenFlags, ThreadedBackend};
use crate::config::StorageDriveConfig;
use crate::drive_table::DriveTable;
use crate::estimator::{CompletionEstimator, EstimateTarget, PendingEstimate};
use crate::file_handle_cache::{FileHandleCache, OpenError};
use crate::ingress::RequestSender;
use crate::metadata_cache::MetaDataCache;
use crate::read_slot::{FinalizedRead, IssueReadError, ReadSlotPool};
use crate::request::{
    CancelOutcome, CompletedRequest, Completion, FileRequest, RequestId, RequestKind, RequestOutput,
};
use crate::request_queues::RequestQueues;
use crate::statistics::{
    duration_ms, push_average, push_counter, DriveStatistics, DriveStatus, Statistic,
};
use crate::{FailureKind, StorageDriveResult};
use crossbeam_channel::{Receiver, Sender};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use streamdrive_base::hashing::{HashMap, HashSet};

// What a request needs done, decided before the request is moved
enum RequestClass {
    Read,
    Exists,
    MetaData,
    Cancel(RequestId),
    Report,
    Flush,
}

enum StartRead {
    Started,
    // Finished without a native read (failed, or nothing to read)
    Completed,
    // Couldn't get a file handle or the backend is out of resources, try again next tick
    Deferred(FileRequest),
}

/// Serves reads, existence checks and size queries for the drives in its config. All methods
/// except request submission (see [`RequestSender`]) must be called from the thread that owns the
/// drive, which should call `execute_requests` once per tick.
pub struct StorageDrive {
    config: StorageDriveConfig,
    drive_table: Arc<DriveTable>,
    backend: Box<dyn AsyncReadBackend>,
    open_flags: OpenFlags,

    file_handle_cache: FileHandleCache,
    metadata_cache: MetaDataCache,
    read_slots: ReadSlotPool,
    queues: RequestQueues,
    // Requests submitted from other threads, moved into the queues at the start of each tick
    request_tx: Sender<FileRequest>,
    request_rx: Receiver<FileRequest>,

    estimator: CompletionEstimator,
    estimates: HashMap<RequestId, Instant>,
    deadline_missed: HashSet<RequestId>,
    statistics: DriveStatistics,

    next_request_id: Arc<AtomicU64>,
    completion_tx: Sender<CompletedRequest>,
}

impl StorageDrive {
    /// Fails if the config is invalid or none of its drive paths can be opened
    pub fn new(
        config: StorageDriveConfig,
        backend: Box<dyn AsyncReadBackend>,
        completion_tx: Sender<CompletedRequest>,
    ) -> StorageDriveResult<Self> {
        config.validate()?;
        let drive_table = Arc::new(DriveTable::mount(&config.drives)?);

        let alignment = if config.flags.enable_unbuffered_reads {
            Some(config.unbuffered_alignment())
        } else {
            None
        };

        let read_slots = ReadSlotPool::new(
            config.read_slot_count(),
            config.io_channel_count,
            config.over_commit,
            alignment,
        );

        log::info!(
            "Created storage drive with {} read slots, {} cached file handles, {} cached metadata entries",
            read_slots.slot_count(),
            config.max_cached_file_handles,
            config.max_cached_metadata
        );

        let (request_tx, request_rx) = crossbeam_channel::unbounded();

        Ok(StorageDrive {
            drive_table,
            backend,
            open_flags: OpenFlags {
                unbuffered: config.flags.enable_unbuffered_reads,
                sharing: config.flags.enable_sharing,
            },
            file_handle_cache: FileHandleCache::new(
                config.max_cached_file_handles,
                config.throughput_window,
            ),
            metadata_cache: MetaDataCache::new(config.max_cached_metadata as usize),
            read_slots,
            queues: RequestQueues::default(),
            request_tx,
            request_rx,
            estimator: CompletionEstimator::new(&config),
            estimates: Default::default(),
            deadline_missed: Default::default(),
            statistics: DriveStatistics::new(config.throughput_window),
            next_request_id: Arc::new(AtomicU64::new(1)),
            completion_tx,
            config,
        })
    }

    /// Drive backed by a pool of read worker threads, one per read slot
    pub fn new_threaded(
        config: StorageDriveConfig,
        completion_tx: Sender<CompletedRequest>,
    ) -> StorageDriveResult<Self> {
        let slot_count = config.read_slot_count();
        let backend = ThreadedBackend::new(slot_count, slot_count)?;
        Self::new(config, Box::new(backend), completion_tx)
    }

    pub fn config(&self) -> &StorageDriveConfig {
        &self.config
    }

    pub fn request_sender(&self) -> RequestSender {
        RequestSender::new(
            self.next_request_id.clone(),
            self.drive_table.clone(),
            self.request_tx.clone(),
        )
    }

    /// Resolves a drive-relative path on the request. Returns false if the drive isn't served
    /// here.
    pub fn prepare_request(
        &self,
        request: &mut FileRequest,
    ) -> bool {
        self.drive_table.prepare(request)
    }

    /// Queues a request from the IO thread. Other threads use a [`RequestSender`].
    pub fn queue_request(
        &mut self,
        request: FileRequest,
    ) {
        log::trace!("queue_request {:?}", request.id());
        self.queues.push_pending(request);
    }

    /// Runs one tick: finishes completed reads, classifies new requests and starts as many
    /// queued reads as the device allows. Returns true if anything was done.
    #[profiling::function]
    pub fn execute_requests(&mut self) -> bool {
        let mut did_work = self.process_completions();
        did_work |= self.process_ingress();
        did_work |= self.process_pending_requests();
        did_work |= self.dispatch_pending_reads();

        if did_work {
            log::debug!(
                "Drive tick: {} active reads ({} bytes), {} pending reads, {} cached handles",
                self.read_slots.active_count(),
                self.read_slots.active_bytes(),
                self.queues.pending_read_len(),
                self.file_handle_cache.len()
            );
        }

        did_work
    }

    #[profiling::function]
    fn process_completions(&mut self) -> bool {
        let completed_slots = self.read_slots.poll_completions(self.backend.as_mut());
        let did_work = !completed_slots.is_empty();
        for slot in completed_slots {
            if let Some(finalized) = self.read_slots.finalize(slot) {
                self.complete_read(finalized);
            }
        }

        did_work
    }

    fn process_ingress(&mut self) -> bool {
        let mut did_work = false;
        while let Ok(request) = self.request_rx.try_recv() {
            self.queues.push_pending(request);
            did_work = true;
        }

        did_work
    }

    #[profiling::function]
    fn process_pending_requests(&mut self) -> bool {
        let pending = self.queues.pop_all_pending();
        let did_work = !pending.is_empty();
        for request in pending {
            self.classify_request(request);
        }

        did_work
    }

    fn classify_request(
        &mut self,
        mut request: FileRequest,
    ) {
        if !self.drive_table.prepare(&mut request) {
            log::trace!("Request {:?} names an unknown drive", request.id());
            self.fail_request(request, FailureKind::UnknownDrive);
            return;
        }

        let class = match request.kind() {
            RequestKind::Read(_) => RequestClass::Read,
            RequestKind::Exists(_) => RequestClass::Exists,
            RequestKind::MetaData(_) => RequestClass::MetaData,
            RequestKind::Cancel(target) => RequestClass::Cancel(*target),
            RequestKind::Report => RequestClass::Report,
            RequestKind::Flush(_) => RequestClass::Flush,
        };

        match class {
            // Reads always go through the read queue so they start in arrival order
            RequestClass::Read => self.queues.push_pending_read(request),
            RequestClass::Exists => self.process_metadata_request(request, true),
            RequestClass::MetaData => self.process_metadata_request(request, false),
            RequestClass::Cancel(target) => self.process_cancel(request, target),
            RequestClass::Report => {
                let mut statistics = Vec::default();
                self.collect_statistics(&mut statistics);
                self.complete(
                    request,
                    Completion::Success(RequestOutput::Statistics(statistics)),
                );
            }
            RequestClass::Flush => self.process_flush(request),
        }
    }

    // Size of the file, or None if it doesn't exist
    fn lookup_file_size(
        &mut self,
        path: &Path,
    ) -> Result<Option<u64>, FailureKind> {
        if let Some(size) = self.metadata_cache.get(path) {
            self.statistics.metadata_cache_hits += 1;
            return Ok(Some(size));
        }

        self.statistics.metadata_cache_misses += 1;
        let size = match self.file_handle_cache.find_or_open(
            self.backend.as_mut(),
            path,
            self.open_flags,
        ) {
            Ok(index) => self.file_handle_cache.file(index).map(|file| file.size()),
            Err(OpenError::NotFound) => None,
            Err(OpenError::CacheFull) => {
                // No idle handle to spare, stat without keeping the file open
                match self.backend.file_size(path) {
                    Ok(size) => Some(size),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(FailureKind::Os(Arc::new(e))),
                }
            }
            Err(OpenError::Os(e)) => return Err(FailureKind::Os(Arc::new(e))),
        };

        if let Some(size) = size {
            self.metadata_cache.insert(path, size);
        }

        Ok(size)
    }

    fn process_metadata_request(
        &mut self,
        request: FileRequest,
        exists_only: bool,
    ) {
        let start = Instant::now();
        let path = match request.resolved_path() {
            Some(path) => path.to_path_buf(),
            None => {
                self.fail_request(request, FailureKind::UnknownDrive);
                return;
            }
        };

        let completion = match self.lookup_file_size(&path) {
            Ok(size) if exists_only => Completion::Success(RequestOutput::Exists(size.is_some())),
            Ok(size) => Completion::Success(RequestOutput::MetaData(size)),
            Err(kind) => Completion::Failure(kind),
        };

        let elapsed_ms = duration_ms(start.elapsed());
        if exists_only {
            self.statistics.exists_time_ms.push(elapsed_ms);
        } else {
            self.statistics.metadata_time_ms.push(elapsed_ms);
        }

        log::trace!("{:?} {:?}: {:?}", request.id(), path, completion);
        self.complete(request, completion);
    }

    fn process_cancel(
        &mut self,
        request: FileRequest,
        target: RequestId,
    ) {
        if let Some(mut removed) = self.queues.remove(target) {
            log::trace!("Cancel {:?} removed queued request {:?}", request.id(), target);
            self.forget_request(target);
            if removed.as_read().is_some() {
                self.statistics.reads_canceled += 1;
            }

            // The removed request gets no completion of its own, its buffer comes back here
            let buffer = removed.take_buffer();
            self.send_completion(
                &request,
                Completion::Success(RequestOutput::Cancel(CancelOutcome::Removed)),
                buffer,
            );
            return;
        }

        let outcome = if self.read_slots.cancel(target, self.backend.as_mut()) {
            log::trace!("Cancel {:?} flagged in-flight read {:?}", request.id(), target);
            CancelOutcome::Flagged
        } else {
            CancelOutcome::NotFound
        };

        self.complete(
            request,
            Completion::Success(RequestOutput::Cancel(outcome)),
        );
    }

    fn process_flush(
        &mut self,
        request: FileRequest,
    ) {
        if let Some(path) = request.resolved_path() {
            let outcome = self.file_handle_cache.flush(path);
            self.metadata_cache.invalidate(path);
            log::debug!("Flushed {:?}: {:?}", path, outcome);
        }

        self.complete(request, Completion::Success(RequestOutput::Flushed));
    }

    #[profiling::function]
    fn dispatch_pending_reads(&mut self) -> bool {
        let mut did_work = false;
        while self.read_slots.available_count() > 0 {
            let slot = match self.read_slots.find_available() {
                Some(slot) => slot,
                None => break,
            };

            let request = match self.queues.pop_pending_read() {
                Some(request) => request,
                None => break,
            };

            match self.start_read(slot, request) {
                StartRead::Started | StartRead::Completed => did_work = true,
                StartRead::Deferred(request) => {
                    self.statistics.reads_deferred += 1;
                    self.queues.push_pending_read_front(request);
                    break;
                }
            }
        }

        did_work
    }

    fn start_read(
        &mut self,
        slot: usize,
        request: FileRequest,
    ) -> StartRead {
        let path = match request.resolved_path() {
            Some(path) => path.to_path_buf(),
            None => {
                self.fail_request(request, FailureKind::UnknownDrive);
                return StartRead::Completed;
            }
        };

        let file_index = match self.file_handle_cache.find_or_open(
            self.backend.as_mut(),
            &path,
            self.open_flags,
        ) {
            Ok(index) => index,
            Err(OpenError::CacheFull) => {
                log::trace!("No idle file handle for {:?}, deferring", request.id());
                return StartRead::Deferred(request);
            }
            Err(OpenError::NotFound) => {
                self.fail_request(request, FailureKind::NotFound);
                return StartRead::Completed;
            }
            Err(OpenError::Os(e)) => {
                self.fail_request(request, FailureKind::Os(Arc::new(e)));
                return StartRead::Completed;
            }
        };

        let file = match self.file_handle_cache.file(file_index) {
            Some(file) => file.clone(),
            None => {
                self.fail_request(request, FailureKind::NotFound);
                return StartRead::Completed;
            }
        };

        if self.metadata_cache.find(&path).is_none() {
            self.metadata_cache.insert(&path, file.size());
        }

        let (offset, size) = match request.as_read() {
            Some(read) => (read.offset, read.size),
            None => (0, 0),
        };

        if offset > file.size() {
            self.fail_request(request, FailureKind::OutOfRange);
            return StartRead::Completed;
        }

        // Reads past the end of the file are cut short
        let length = size.min(file.size() - offset) as usize;
        if length == 0 {
            self.statistics.reads_completed += 1;
            self.complete(
                request,
                Completion::Success(RequestOutput::Read { bytes_read: 0 }),
            );
            return StartRead::Completed;
        }

        log::trace!(
            "Start read {:?} {:?} offset {} length {} in slot {}",
            request.id(),
            path,
            offset,
            length,
            slot
        );

        self.file_handle_cache.mark_active(file_index);
        match self.read_slots.issue_read(
            slot,
            self.backend.as_mut(),
            &file,
            file_index,
            request,
            offset,
            length,
        ) {
            Ok(()) => StartRead::Started,
            Err(IssueReadError::Retry(request)) => {
                self.file_handle_cache.mark_inactive(file_index);
                StartRead::Deferred(request)
            }
            Err(IssueReadError::Failed(request, kind)) => {
                self.file_handle_cache.mark_inactive(file_index);
                self.fail_request(request, kind);
                StartRead::Completed
            }
        }
    }

    fn complete_read(
        &mut self,
        finalized: FinalizedRead,
    ) {
        let FinalizedRead {
            request,
            file_index,
            completion,
            buffer,
            bytes_read,
            elapsed,
        } = finalized;

        self.file_handle_cache.mark_inactive(file_index);

        match &completion {
            Completion::Success(_) => {
                self.statistics.reads_completed += 1;
                self.statistics.read_time_ms.push(duration_ms(elapsed));
                self.statistics.read_size_bytes.push(bytes_read as f64);
                self.estimator.record_read(bytes_read, elapsed);

                let deadline = request.as_read().and_then(|read| read.deadline);
                if let Some(deadline) = deadline {
                    if Instant::now() > deadline && self.deadline_missed.insert(request.id()) {
                        self.statistics.deadline_misses += 1;
                    }
                }
            }
            Completion::Failure(kind) => {
                log::debug!("Read {:?} failed: {}", request.id(), kind);
                self.statistics.reads_failed += 1;
            }
            Completion::Canceled => self.statistics.reads_canceled += 1,
        }

        log::trace!("Read {:?} finished, {} bytes", request.id(), bytes_read);
        self.forget_request(request.id());
        self.send_completion(&request, completion, Some(buffer));
    }

    fn fail_request(
        &mut self,
        request: FileRequest,
        kind: FailureKind,
    ) {
        if request.as_read().is_some() {
            self.statistics.reads_failed += 1;
        }

        log::debug!("Request {:?} failed: {}", request.id(), kind);
        self.forget_request(request.id());
        self.complete(request, Completion::Failure(kind));
    }

    fn forget_request(
        &mut self,
        id: RequestId,
    ) {
        self.estimates.remove(&id);
        self.deadline_missed.remove(&id);
    }

    fn complete(
        &self,
        mut request: FileRequest,
        completion: Completion,
    ) {
        let buffer = request.take_buffer();
        self.send_completion(&request, completion, buffer);
    }

    fn send_completion(
        &self,
        request: &FileRequest,
        completion: Completion,
        buffer: Option<Vec<u8>>,
    ) {
        let completed = CompletedRequest {
            id: request.id(),
            parent: request.parent(),
            completion,
            buffer,
        };

        if self.completion_tx.send(completed).is_err() {
            log::debug!(
                "Completion receiver dropped, discarding completion of {:?}",
                request.id()
            );
        }
    }

    pub fn update_status(
        &self,
        status: &mut DriveStatus,
    ) {
        status.active_reads = self.read_slots.active_count();
        status.pending_requests = self.queues.pending_len() + self.request_rx.len();
        status.pending_reads = self.queues.pending_read_len();
        status.queue_depth = status.active_reads + status.pending_requests + status.pending_reads;
        status.busy = status.queue_depth > 0;
        status.active_bytes = self.read_slots.active_bytes();
        status.available_slots =
            self.read_slots.commit_budget() - status.pending_reads as i64;
    }

    /// Estimates when each of this drive's reads will finish, then keeps the same clock running
    /// over reads queued further up the stream stack and fills in their estimates
    #[profiling::function]
    pub fn update_completion_estimates(
        &mut self,
        now: Instant,
        upstream: &mut [PendingEstimate],
    ) {
        let mut ids = Vec::default();
        let mut deadlines = Vec::default();

        let mut active = Vec::default();
        for read in self.read_slots.active_reads() {
            if let Some(path) = read.request().resolved_path() {
                active.push(EstimateTarget {
                    path,
                    offset: read.offset(),
                    size: read.length() as u64,
                    elapsed: now.saturating_duration_since(read.issued_at()),
                });
                ids.push(read.request().id());
                deadlines.push(read.request().as_read().and_then(|r| r.deadline));
            }
        }

        let mut queued = Vec::default();
        for request in self.queues.pending_reads() {
            if let (Some(path), Some(read)) = (request.resolved_path(), request.as_read()) {
                queued.push(EstimateTarget {
                    path,
                    offset: read.offset,
                    size: read.size,
                    elapsed: std::time::Duration::ZERO,
                });
                ids.push(request.id());
                deadlines.push(read.deadline);
            }
        }

        let (active_estimates, queued_estimates, mut cursor) =
            self.estimator
                .estimate_completion_times(now, &active, &queued);

        self.estimates.clear();
        for ((id, deadline), estimate) in ids
            .into_iter()
            .zip(deadlines)
            .zip(active_estimates.into_iter().chain(queued_estimates))
        {
            self.estimates.insert(id, estimate);
            if let Some(deadline) = deadline {
                if estimate > deadline && self.deadline_missed.insert(id) {
                    self.statistics.deadline_misses += 1;
                }
            }
        }

        for pending in upstream.iter_mut() {
            let target = EstimateTarget {
                path: &pending.path,
                offset: pending.offset,
                size: pending.size,
                elapsed: std::time::Duration::ZERO,
            };
            pending.estimated_completion = Some(self.estimator.advance_queued(&mut cursor, &target));
        }
    }

    /// Estimate from the last `update_completion_estimates` for a read this drive holds
    pub fn estimated_completion(
        &self,
        id: RequestId,
    ) -> Option<Instant> {
        self.estimates.get(&id).copied()
    }

    pub fn collect_statistics(
        &self,
        statistics: &mut Vec<Statistic>,
    ) {
        push_average(
            statistics,
            "open_time_ms",
            self.file_handle_cache.open_time_ms(),
        );
        push_average(
            statistics,
            "close_time_ms",
            self.file_handle_cache.close_time_ms(),
        );
        push_average(
            statistics,
            "exists_time_ms",
            &self.statistics.exists_time_ms,
        );
        push_average(
            statistics,
            "metadata_time_ms",
            &self.statistics.metadata_time_ms,
        );
        push_average(statistics, "read_time_ms", &self.statistics.read_time_ms);
        push_average(
            statistics,
            "read_size_bytes",
            &self.statistics.read_size_bytes,
        );
        push_counter(statistics, "active_bytes", self.read_slots.active_bytes());

        if self.config.flags.minimal_reporting {
            return;
        }

        statistics.push(Statistic::new(
            "read_bytes_per_second",
            self.estimator.bytes_per_second(),
        ));
        push_counter(
            statistics,
            "file_handle_cache_hits",
            self.file_handle_cache.hits(),
        );
        push_counter(
            statistics,
            "file_handle_cache_misses",
            self.file_handle_cache.misses(),
        );
        push_counter(
            statistics,
            "metadata_cache_hits",
            self.statistics.metadata_cache_hits,
        );
        push_counter(
            statistics,
            "metadata_cache_misses",
            self.statistics.metadata_cache_misses,
        );
        push_counter(
            statistics,
            "reads_completed",
            self.statistics.reads_completed,
        );
        push_counter(statistics, "reads_failed", self.statistics.reads_failed);
        push_counter(statistics, "reads_canceled", self.statistics.reads_canceled);
        push_counter(statistics, "reads_deferred", self.statistics.reads_deferred);
        push_counter(
            statistics,
            "deadline_misses",
            self.statistics.deadline_misses,
        );
    }

    pub fn statistics(&self) -> &DriveStatistics {
        &self.statistics
    }

    pub fn file_handle_cache(&self) -> &FileHandleCache {
        &self.file_handle_cache
    }

    pub fn metadata_cache(&self) -> &MetaDataCache {
        &self.metadata_cache
    }

    pub fn read_slots(&self) -> &ReadSlotPool {
        &self.read_slots
    }
}

impl Drop for StorageDrive {
    fn drop(&mut self) {
        profiling::scope!("StorageDrive::drop");
        self.process_ingress();

        // Reads in flight still own their buffers, wait for the backend to hand them back
        let completed_slots = self.read_slots.cancel_all_and_wait(self.backend.as_mut());
        for slot in completed_slots {
            if let Some(finalized) = self.read_slots.finalize(slot) {
                self.complete_read(finalized);
            }
        }

        let queued = self.queues.drain_all();
        if !queued.is_empty() {
            log::debug!("Canceling {} queued requests", queued.len());
        }
        for request in queued {
            if request.as_read().is_some() {
                self.statistics.reads_canceled += 1;
            }
            self.complete(request, Completion::Canceled);
        }

        self.file_handle_cache.flush_all();
    }
}
