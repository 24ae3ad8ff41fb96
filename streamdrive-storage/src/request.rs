use crate::statistics::Statistic;
use crate::FailureKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Identifies a request for its whole lifetime, including cancellation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Opaque continuation owned by the upstream stream stack. It is carried through to the
/// completion untouched.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ParentLink(pub u64);

/// Target file of a request
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestPath {
    Absolute(PathBuf),
    // Path relative to one of the drives this device serves
    Drive { drive: String, relative: PathBuf },
}

impl RequestPath {
    pub fn drive(
        drive: &str,
        relative: impl Into<PathBuf>,
    ) -> Self {
        RequestPath::Drive {
            drive: drive.to_string(),
            relative: relative.into(),
        }
    }

    pub fn absolute(path: impl Into<PathBuf>) -> Self {
        RequestPath::Absolute(path.into())
    }
}

#[derive(Debug)]
pub struct ReadRequest {
    pub path: RequestPath,
    pub offset: u64,
    pub size: u64,
    // Destination. Ownership moves into the drive and comes back with the completion.
    pub buffer: Vec<u8>,
    pub deadline: Option<Instant>,
}

impl ReadRequest {
    pub fn new(
        path: RequestPath,
        offset: u64,
        size: u64,
    ) -> Self {
        ReadRequest {
            path,
            offset,
            size,
            buffer: Vec::default(),
            deadline: None,
        }
    }

    /// Reuse a caller-owned buffer as the destination. It is grown if too small.
    pub fn with_buffer(
        mut self,
        buffer: Vec<u8>,
    ) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_deadline(
        mut self,
        deadline: Instant,
    ) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug)]
pub enum RequestKind {
    Read(ReadRequest),
    Exists(RequestPath),
    MetaData(RequestPath),
    Cancel(RequestId),
    Report,
    // The file changed out of band, drop any cached handle and size
    Flush(RequestPath),
}

impl RequestKind {
    pub fn request_path(&self) -> Option<&RequestPath> {
        match self {
            RequestKind::Read(read) => Some(&read.path),
            RequestKind::Exists(path) => Some(path),
            RequestKind::MetaData(path) => Some(path),
            RequestKind::Flush(path) => Some(path),
            RequestKind::Cancel(_) => None,
            RequestKind::Report => None,
        }
    }
}

#[derive(Debug)]
pub struct FileRequest {
    id: RequestId,
    parent: ParentLink,
    kind: RequestKind,
    // Filled in by prepare_request
    resolved_path: Option<PathBuf>,
}

impl FileRequest {
    pub fn new(
        id: RequestId,
        parent: ParentLink,
        kind: RequestKind,
    ) -> Self {
        FileRequest {
            id,
            parent,
            kind,
            resolved_path: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn parent(&self) -> ParentLink {
        self.parent
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut RequestKind {
        &mut self.kind
    }

    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolved_path.as_deref()
    }

    pub(crate) fn set_resolved_path(
        &mut self,
        path: PathBuf,
    ) {
        self.resolved_path = Some(path);
    }

    pub fn as_read(&self) -> Option<&ReadRequest> {
        match &self.kind {
            RequestKind::Read(read) => Some(read),
            _ => None,
        }
    }

    pub(crate) fn as_read_mut(&mut self) -> Option<&mut ReadRequest> {
        match &mut self.kind {
            RequestKind::Read(read) => Some(read),
            _ => None,
        }
    }

    /// Takes the destination buffer out of a read request so it can be handed back to the caller
    pub(crate) fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.as_read_mut()
            .map(|read| std::mem::take(&mut read.buffer))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    // Target was still queued. It is dropped without a completion of its own, and its buffer
    // returns with the cancel request's completion.
    Removed,
    // Target is in flight. It will complete with Completion::Canceled.
    Flagged,
    // Target already completed or never existed
    NotFound,
}

#[derive(Debug)]
pub enum RequestOutput {
    Read { bytes_read: u64 },
    Exists(bool),
    // None if the file does not exist
    MetaData(Option<u64>),
    Statistics(Vec<Statistic>),
    Flushed,
    Cancel(CancelOutcome),
}

#[derive(Debug)]
pub enum Completion {
    Success(RequestOutput),
    Failure(FailureKind),
    Canceled,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Success(_))
    }
}

/// Sent exactly once for every request that was queued, except requests removed by a cancel
#[derive(Debug)]
pub struct CompletedRequest {
    pub id: RequestId,
    pub parent: ParentLink,
    pub completion: Completion,
    pub buffer: Option<Vec<u8>>,
}
