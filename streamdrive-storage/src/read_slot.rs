use crate::backend::{
    is_transient_issue_error, AsyncReadBackend, IoBuffer, IssueFailure, NativeCompletion,
    NativeFile, NativeRead,
};
use crate::request::{Completion, FileRequest, RequestId, RequestOutput};
use crate::{FailureKind, IssueError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamdrive_base::aligned_buffer::{align_down, align_up, is_aligned};
use streamdrive_base::AlignedBuffer;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadSlotState {
    Idle,
    // Native read outstanding. The backend owns the buffer.
    Issued,
    // Reported by the backend, waiting to be finalized
    Completing,
}

/// The request a slot is serving and what's needed to finish it
pub struct ActiveRead {
    request: FileRequest,
    file_index: u32,
    offset: u64,
    length: usize,
    // Where the requested bytes start within the scratch buffer
    copy_back_offset: usize,
    // Parked here while the native read targets a scratch buffer
    caller_buffer: Option<Vec<u8>>,
    issued_at: Instant,
    cancel_requested: bool,
}

impl ActiveRead {
    pub fn request(&self) -> &FileRequest {
        &self.request
    }

    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }
}

struct ReadSlot {
    state: ReadSlotState,
    active: Option<ActiveRead>,
    completion: Option<NativeCompletion>,
}

pub enum IssueReadError {
    // The backend is out of resources, try again next tick
    Retry(FileRequest),
    Failed(FileRequest, FailureKind),
}

/// Result of finishing a read. The request is handed back so the drive can complete it.
pub struct FinalizedRead {
    pub request: FileRequest,
    pub file_index: u32,
    pub completion: Completion,
    pub buffer: Vec<u8>,
    pub bytes_read: u64,
    pub elapsed: Duration,
}

/// Fixed set of native reads that may be in flight at once. Slots are allocated when the pool is
/// created and reused for the lifetime of the drive.
pub struct ReadSlotPool {
    slots: Vec<ReadSlot>,
    io_channel_count: u32,
    over_commit: i32,
    // Set when reads must be sector aligned
    alignment: Option<u64>,
}

impl ReadSlotPool {
    pub fn new(
        slot_count: usize,
        io_channel_count: u32,
        over_commit: i32,
        alignment: Option<u64>,
    ) -> Self {
        let slots = (0..slot_count.max(1))
            .map(|_| ReadSlot {
                state: ReadSlotState::Idle,
                active: None,
                completion: None,
            })
            .collect();

        ReadSlotPool {
            slots,
            io_channel_count,
            over_commit,
            alignment,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn state(
        &self,
        slot: usize,
    ) -> ReadSlotState {
        self.slots[slot].state
    }

    pub fn find_available(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == ReadSlotState::Idle)
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != ReadSlotState::Idle)
            .count()
    }

    /// Signed over-commit budget, `io_channel_count + over_commit - active`. Unlike
    /// `available_count` this is not limited by the slots that exist, so a positive over-commit
    /// shows up here as room for extra queued work.
    pub fn commit_budget(&self) -> i64 {
        self.io_channel_count as i64 + self.over_commit as i64 - self.active_count() as i64
    }

    /// How many more reads may start this tick. Zero or negative means none.
    pub fn available_count(&self) -> i64 {
        let free_slots = self.slots.len() as i64 - self.active_count() as i64;
        self.commit_budget().min(free_slots)
    }

    pub fn active_reads(&self) -> impl Iterator<Item = &ActiveRead> {
        self.slots.iter().filter_map(|slot| slot.active.as_ref())
    }

    pub fn active_bytes(&self) -> u64 {
        self.active_reads().map(|read| read.length as u64).sum()
    }

    /// Starts a read of `length` bytes at `offset` into the request's buffer. If the drive requires
    /// aligned reads and the range or buffer isn't aligned, the native read targets an aligned
    /// scratch buffer covering the range instead, and the requested bytes are copied out when the
    /// read is finalized.
    pub fn issue_read(
        &mut self,
        slot: usize,
        backend: &mut dyn AsyncReadBackend,
        file: &NativeFile,
        file_index: u32,
        mut request: FileRequest,
        offset: u64,
        length: usize,
    ) -> Result<(), IssueReadError> {
        profiling::scope!("ReadSlotPool::issue_read");
        debug_assert_eq!(self.slots[slot].state, ReadSlotState::Idle);

        let mut caller_buffer = request.take_buffer().unwrap_or_default();
        if caller_buffer.len() < length {
            caller_buffer.resize(length, 0);
        }

        let mut copy_back_offset = 0;
        let (native_offset, native_length, buffer, parked) = match self.alignment {
            Some(alignment)
                if !(is_aligned(offset, alignment)
                    && is_aligned(length as u64, alignment)
                    && is_aligned(caller_buffer.as_ptr() as u64, alignment)) =>
            {
                let aligned_offset = align_down(offset, alignment);
                copy_back_offset = (offset - aligned_offset) as usize;
                let aligned_length =
                    align_up(copy_back_offset as u64 + length as u64, alignment) as usize;
                let scratch = match AlignedBuffer::new(aligned_length, alignment as usize) {
                    Ok(scratch) => scratch,
                    Err(e) => {
                        log::warn!("Could not allocate aligned scratch buffer: {}", e);
                        restore_buffer(&mut request, caller_buffer);
                        return Err(IssueReadError::Failed(request, FailureKind::Misaligned));
                    }
                };

                log::trace!(
                    "Read {:?} needs scratch buffer, offset {} -> {} length {} -> {}",
                    request.id(),
                    offset,
                    aligned_offset,
                    length,
                    aligned_length
                );
                (
                    aligned_offset,
                    aligned_length,
                    IoBuffer::Scratch(scratch),
                    Some(caller_buffer),
                )
            }
            _ => (offset, length, IoBuffer::Caller(caller_buffer), None),
        };

        let read = NativeRead {
            slot,
            file: file.clone(),
            offset: native_offset,
            length: native_length,
            buffer,
        };

        match backend.issue_read(read) {
            Ok(()) => {
                let slot = &mut self.slots[slot];
                slot.state = ReadSlotState::Issued;
                slot.active = Some(ActiveRead {
                    request,
                    file_index,
                    offset,
                    length,
                    copy_back_offset,
                    caller_buffer: parked,
                    issued_at: Instant::now(),
                    cancel_requested: false,
                });
                Ok(())
            }
            Err(IssueFailure { error, read }) => {
                let caller_buffer = match read.buffer {
                    IoBuffer::Caller(buffer) => buffer,
                    IoBuffer::Scratch(_) => parked.unwrap_or_default(),
                };
                restore_buffer(&mut request, caller_buffer);

                match error {
                    IssueError::ResourceExhausted => Err(IssueReadError::Retry(request)),
                    IssueError::Os(e) if is_transient_issue_error(&e) => {
                        log::debug!("Transient error issuing read {:?}, retrying: {}", request.id(), e);
                        Err(IssueReadError::Retry(request))
                    }
                    IssueError::Os(e) => Err(IssueReadError::Failed(
                        request,
                        FailureKind::Os(Arc::new(e)),
                    )),
                }
            }
        }
    }

    fn store_completions(
        &mut self,
        completions: Vec<NativeCompletion>,
    ) -> Vec<usize> {
        let mut completed_slots = Vec::with_capacity(completions.len());
        for completion in completions {
            let index = completion.slot;
            match self.slots.get_mut(index) {
                Some(slot) if slot.state == ReadSlotState::Issued => {
                    slot.state = ReadSlotState::Completing;
                    slot.completion = Some(completion);
                    completed_slots.push(index);
                }
                _ => log::error!("Completion for read slot {} that was not issued", index),
            }
        }

        completed_slots
    }

    /// Slots whose native read has finished. Each must be passed to `finalize`.
    pub fn poll_completions(
        &mut self,
        backend: &mut dyn AsyncReadBackend,
    ) -> Vec<usize> {
        let mut completions = Vec::default();
        backend.poll_completions(&mut completions);
        self.store_completions(completions)
    }

    /// Flags every issued read as canceled and blocks until the backend has reported all of them
    pub fn cancel_all_and_wait(
        &mut self,
        backend: &mut dyn AsyncReadBackend,
    ) -> Vec<usize> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(active) = &mut slot.active {
                if slot.state == ReadSlotState::Issued {
                    active.cancel_requested = true;
                    backend.cancel(index);
                }
            }
        }

        let mut completions = Vec::default();
        backend.wait_for_all(&mut completions);
        self.store_completions(completions)
    }

    /// Flags the read serving the request as canceled. It still completes through polling.
    pub fn cancel(
        &mut self,
        id: RequestId,
        backend: &mut dyn AsyncReadBackend,
    ) -> bool {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(active) = &mut slot.active {
                if active.request.id() == id {
                    if !active.cancel_requested {
                        active.cancel_requested = true;
                        if slot.state == ReadSlotState::Issued {
                            backend.cancel(index);
                        }
                    }
                    return true;
                }
            }
        }

        false
    }

    /// Copies data out of the scratch buffer if one was used and releases the slot
    pub fn finalize(
        &mut self,
        slot: usize,
    ) -> Option<FinalizedRead> {
        let slot = &mut self.slots[slot];
        if slot.state != ReadSlotState::Completing {
            return None;
        }

        slot.state = ReadSlotState::Idle;
        let active = slot.active.take()?;
        let completion = slot.completion.take()?;

        let transferred = match &completion.result {
            Ok(transferred) => *transferred,
            Err(_) => 0,
        };

        let (buffer, valid) = match completion.buffer {
            IoBuffer::Caller(buffer) => (buffer, transferred.min(active.length)),
            IoBuffer::Scratch(scratch) => {
                let mut buffer = active.caller_buffer.unwrap_or_default();
                let valid = transferred
                    .saturating_sub(active.copy_back_offset)
                    .min(active.length);
                if buffer.len() < valid {
                    buffer.resize(valid, 0);
                }
                buffer[..valid].copy_from_slice(
                    &scratch[active.copy_back_offset..active.copy_back_offset + valid],
                );
                (buffer, valid)
            }
        };

        let result = if completion.canceled || active.cancel_requested {
            Completion::Canceled
        } else {
            match completion.result {
                Ok(_) => Completion::Success(RequestOutput::Read {
                    bytes_read: valid as u64,
                }),
                Err(e) => Completion::Failure(FailureKind::from_io_error(e)),
            }
        };

        Some(FinalizedRead {
            request: active.request,
            file_index: active.file_index,
            completion: result,
            buffer,
            bytes_read: valid as u64,
            elapsed: active.issued_at.elapsed(),
        })
    }
}

fn restore_buffer(
    request: &mut FileRequest,
    buffer: Vec<u8>,
) {
    if let Some(read) = request.as_read_mut() {
        read.buffer = buffer;
    }
}
