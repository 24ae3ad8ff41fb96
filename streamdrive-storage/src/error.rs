use std::sync::Arc;

/// Errors that prevent a drive from being configured or constructed. Failures of individual
/// requests are never reported this way, see [`FailureKind`].
#[derive(Debug, Clone)]
pub enum StorageDriveError {
    StringError(String),
    InvalidConfig(String),
    NoUsableDrivePath,
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
}

impl std::error::Error for StorageDriveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            StorageDriveError::StringError(_) => None,
            StorageDriveError::InvalidConfig(_) => None,
            StorageDriveError::NoUsableDrivePath => None,
            StorageDriveError::IoError(ref e) => Some(&**e),
            StorageDriveError::JsonError(ref e) => Some(&**e),
        }
    }
}

impl core::fmt::Display for StorageDriveError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            StorageDriveError::StringError(ref e) => e.fmt(fmt),
            StorageDriveError::InvalidConfig(ref e) => write!(fmt, "Invalid config: {}", e),
            StorageDriveError::NoUsableDrivePath => {
                "None of the configured drive paths could be opened".fmt(fmt)
            }
            StorageDriveError::IoError(ref e) => e.fmt(fmt),
            StorageDriveError::JsonError(ref e) => e.fmt(fmt),
        }
    }
}

impl From<&str> for StorageDriveError {
    fn from(str: &str) -> Self {
        StorageDriveError::StringError(str.to_string())
    }
}

impl From<String> for StorageDriveError {
    fn from(string: String) -> Self {
        StorageDriveError::StringError(string)
    }
}

impl From<std::io::Error> for StorageDriveError {
    fn from(error: std::io::Error) -> Self {
        StorageDriveError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for StorageDriveError {
    fn from(error: serde_json::Error) -> Self {
        StorageDriveError::JsonError(Arc::new(error))
    }
}

pub type StorageDriveResult<T> = Result<T, StorageDriveError>;

/// Why a single request failed. Delivered through the request's completion, the drive keeps
/// running.
#[derive(Debug, Clone)]
pub enum FailureKind {
    NotFound,
    // Read starts past the end of the file
    OutOfRange,
    // Unbuffered read that could not be given an aligned scratch buffer
    Misaligned,
    // Path names a drive this device does not serve
    UnknownDrive,
    Os(Arc<std::io::Error>),
}

impl FailureKind {
    pub fn from_io_error(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            FailureKind::NotFound
        } else {
            FailureKind::Os(Arc::new(error))
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            FailureKind::NotFound => "NotFound".fmt(fmt),
            FailureKind::OutOfRange => "OutOfRange".fmt(fmt),
            FailureKind::Misaligned => "Misaligned".fmt(fmt),
            FailureKind::UnknownDrive => "UnknownDrive".fmt(fmt),
            FailureKind::Os(ref e) => e.fmt(fmt),
        }
    }
}

/// Reasons a backend refused to start a native read
#[derive(Debug)]
pub enum IssueError {
    // Retry on a later tick
    ResourceExhausted,
    Os(std::io::Error),
}

impl core::fmt::Display for IssueError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            IssueError::ResourceExhausted => "ResourceExhausted".fmt(fmt),
            IssueError::Os(ref e) => e.fmt(fmt),
        }
    }
}
