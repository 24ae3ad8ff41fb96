use crate::drive_table::DriveTable;
use crate::request::{FileRequest, ParentLink, ReadRequest, RequestId, RequestKind, RequestPath};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe handle for submitting requests to a drive. Requests are handed to the IO thread
/// over a channel and picked up on the next `execute_requests`.
#[derive(Clone)]
pub struct RequestSender {
    next_request_id: Arc<AtomicU64>,
    drive_table: Arc<DriveTable>,
    request_tx: Sender<FileRequest>,
}

impl RequestSender {
    pub(crate) fn new(
        next_request_id: Arc<AtomicU64>,
        drive_table: Arc<DriveTable>,
        request_tx: Sender<FileRequest>,
    ) -> Self {
        RequestSender {
            next_request_id,
            drive_table,
            request_tx,
        }
    }

    pub fn allocate_request_id(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Resolves drive-relative paths. Safe to call from any thread, and optional since the drive
    /// resolves anything left unresolved when it classifies the request.
    pub fn prepare_request(
        &self,
        request: &mut FileRequest,
    ) -> bool {
        self.drive_table.prepare(request)
    }

    /// Fails only if the drive has been dropped, in which case the request is handed back
    pub fn queue_request(
        &self,
        request: FileRequest,
    ) -> Result<(), FileRequest> {
        log::trace!("queue_request {:?}", request.id());
        self.request_tx.send(request).map_err(|e| e.into_inner())
    }

    fn queue_kind(
        &self,
        parent: ParentLink,
        kind: RequestKind,
    ) -> Result<RequestId, FileRequest> {
        let id = self.allocate_request_id();
        self.queue_request(FileRequest::new(id, parent, kind))?;
        Ok(id)
    }

    pub fn read(
        &self,
        parent: ParentLink,
        read: ReadRequest,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::Read(read))
    }

    pub fn exists(
        &self,
        parent: ParentLink,
        path: RequestPath,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::Exists(path))
    }

    pub fn metadata(
        &self,
        parent: ParentLink,
        path: RequestPath,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::MetaData(path))
    }

    pub fn cancel(
        &self,
        parent: ParentLink,
        target: RequestId,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::Cancel(target))
    }

    pub fn report(
        &self,
        parent: ParentLink,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::Report)
    }

    pub fn flush(
        &self,
        parent: ParentLink,
        path: RequestPath,
    ) -> Result<RequestId, FileRequest> {
        self.queue_kind(parent, RequestKind::Flush(path))
    }
}
