//! Per-device storage driver for streaming game data. A [`StorageDrive`] caches open file handles
//! and file sizes, queues incoming requests, keeps a bounded number of native reads in flight and
//! estimates when queued reads will finish so the stream scheduler can order work across devices.

pub mod backend;
pub mod config;
mod drive;
mod drive_table;
mod error;
pub mod estimator;
pub mod file_handle_cache;
mod ingress;
pub mod metadata_cache;
pub mod read_slot;
pub mod request;
pub mod request_queues;
pub mod statistics;

pub use config::{DriveMount, StorageDriveConfig, StorageDriveFlags};
pub use drive::StorageDrive;
pub use error::{FailureKind, IssueError, StorageDriveError, StorageDriveResult};
pub use estimator::PendingEstimate;
pub use ingress::RequestSender;
pub use request::{
    CancelOutcome, CompletedRequest, Completion, FileRequest, ParentLink, ReadRequest, RequestId,
    RequestKind, RequestOutput, RequestPath,
};
pub use statistics::{DriveStatus, Statistic};

#[cfg(test)]
mod tests;
