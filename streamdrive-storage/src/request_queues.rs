use crate::request::{FileRequest, RequestId};
use std::collections::VecDeque;

/// Requests waiting on the IO thread. New requests wait in `pending` until the next tick
/// classifies them. Reads that couldn't start (no free read slot or file handle) wait in
/// `pending_reads`, in arrival order.
#[derive(Default)]
pub struct RequestQueues {
    pending: VecDeque<FileRequest>,
    pending_reads: VecDeque<FileRequest>,
}

impl RequestQueues {
    pub fn push_pending(
        &mut self,
        request: FileRequest,
    ) {
        self.pending.push_back(request);
    }

    pub fn pop_all_pending(&mut self) -> VecDeque<FileRequest> {
        std::mem::take(&mut self.pending)
    }

    pub fn push_pending_read(
        &mut self,
        request: FileRequest,
    ) {
        self.pending_reads.push_back(request);
    }

    // Used to put back a read that was taken off the front but couldn't be started
    pub fn push_pending_read_front(
        &mut self,
        request: FileRequest,
    ) {
        self.pending_reads.push_front(request);
    }

    pub fn front_pending_read(&self) -> Option<&FileRequest> {
        self.pending_reads.front()
    }

    pub fn pop_pending_read(&mut self) -> Option<FileRequest> {
        self.pending_reads.pop_front()
    }

    /// Takes a request out of either queue if it hasn't started yet
    pub fn remove(
        &mut self,
        id: RequestId,
    ) -> Option<FileRequest> {
        if let Some(position) = self.pending_reads.iter().position(|r| r.id() == id) {
            return self.pending_reads.remove(position);
        }

        if let Some(position) = self.pending.iter().position(|r| r.id() == id) {
            return self.pending.remove(position);
        }

        None
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_read_len(&self) -> usize {
        self.pending_reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.pending_reads.is_empty()
    }

    pub fn pending_reads(&self) -> impl Iterator<Item = &FileRequest> {
        self.pending_reads.iter()
    }

    pub fn drain_all(&mut self) -> Vec<FileRequest> {
        self.pending_reads
            .drain(..)
            .chain(self.pending.drain(..))
            .collect()
    }
}
