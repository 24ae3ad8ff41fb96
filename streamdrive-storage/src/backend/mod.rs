//! Native asynchronous reads. A backend starts reads without blocking and reports them later when
//! polled, so a single IO thread can keep many reads in flight.

mod immediate;
mod native_file;
mod threaded;

pub use immediate::ImmediateBackend;
pub(crate) use native_file::{is_handle_exhaustion, is_transient_issue_error};
pub use native_file::{NativeFile, OpenFlags};
pub use threaded::ThreadedBackend;

use crate::IssueError;
use std::path::Path;
use streamdrive_base::AlignedBuffer;

/// Memory a native read writes into. The backend owns it while the read is outstanding.
pub enum IoBuffer {
    // The caller's destination, used directly when no alignment fixup is needed
    Caller(Vec<u8>),
    // Sector aligned scratch memory for unbuffered reads
    Scratch(AlignedBuffer),
}

impl IoBuffer {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            IoBuffer::Caller(buffer) => buffer.as_mut_slice(),
            IoBuffer::Scratch(buffer) => &mut *buffer,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            IoBuffer::Caller(buffer) => buffer.as_slice(),
            IoBuffer::Scratch(buffer) => &*buffer,
        }
    }
}

pub struct NativeRead {
    // Read slot that owns this operation, echoed back in the completion
    pub slot: usize,
    pub file: NativeFile,
    pub offset: u64,
    pub length: usize,
    pub buffer: IoBuffer,
}

pub struct NativeCompletion {
    pub slot: usize,
    pub buffer: IoBuffer,
    // Bytes transferred
    pub result: std::io::Result<usize>,
    // The read was abandoned before it started
    pub canceled: bool,
}

/// A read the backend refused to start. The read is handed back so its buffer isn't lost.
pub struct IssueFailure {
    pub error: IssueError,
    pub read: NativeRead,
}

pub trait AsyncReadBackend: Send {
    fn open(
        &mut self,
        path: &Path,
        flags: OpenFlags,
    ) -> std::io::Result<NativeFile> {
        NativeFile::open(path, flags)
    }

    // Size of a file without keeping a handle to it
    fn file_size(
        &mut self,
        path: &Path,
    ) -> std::io::Result<u64> {
        NativeFile::stat(path)
    }

    /// Must not block. The read is reported by a later poll_completions/wait_for_all.
    fn issue_read(
        &mut self,
        read: NativeRead,
    ) -> Result<(), IssueFailure>;

    /// Appends every read that finished since the last poll. Must not block.
    fn poll_completions(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    );

    /// Best effort. The read is still reported through polling, possibly as canceled.
    fn cancel(
        &mut self,
        slot: usize,
    );

    /// Blocks until every outstanding read has been reported
    fn wait_for_all(
        &mut self,
        completions: &mut Vec<NativeCompletion>,
    );

    fn outstanding(&self) -> usize;
}
