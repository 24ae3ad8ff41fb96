use crate::config::DriveMount;
use crate::request::{FileRequest, RequestPath};
use crate::{StorageDriveError, StorageDriveResult};
use std::path::PathBuf;

struct MountedDrive {
    name: String,
    root: PathBuf,
}

/// Drive names this device serves, mapped to canonical root directories. Immutable once
/// constructed so it can be shared with request senders on other threads.
pub struct DriveTable {
    drives: Vec<MountedDrive>,
}

impl DriveTable {
    /// Drives whose path can't be opened are skipped. If none can be opened the drive can't be
    /// constructed.
    pub fn mount(drives: &[DriveMount]) -> StorageDriveResult<Self> {
        let mut mounted = Vec::with_capacity(drives.len());
        for drive in drives {
            match dunce::canonicalize(&drive.path) {
                Ok(root) if root.is_dir() => {
                    log::info!("Mounted drive {} at {:?}", drive.name, root);
                    mounted.push(MountedDrive {
                        name: drive.name.clone(),
                        root,
                    });
                }
                Ok(root) => {
                    log::warn!(
                        "Drive {} path {:?} is not a directory, skipping it",
                        drive.name,
                        root
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Drive {} path {:?} could not be opened, skipping it: {}",
                        drive.name,
                        drive.path,
                        e
                    );
                }
            }
        }

        if mounted.is_empty() {
            return Err(StorageDriveError::NoUsableDrivePath);
        }

        Ok(DriveTable { drives: mounted })
    }

    pub fn resolve(
        &self,
        path: &RequestPath,
    ) -> Option<PathBuf> {
        match path {
            RequestPath::Absolute(path) => Some(path.clone()),
            RequestPath::Drive { drive, relative } => self
                .drives
                .iter()
                .find(|mounted| mounted.name == *drive)
                .map(|mounted| mounted.root.join(relative)),
        }
    }

    /// Annotates the request with its resolved path. Returns false if the request names a drive
    /// this table doesn't serve. Calling it again on a resolved request does nothing.
    pub fn prepare(
        &self,
        request: &mut FileRequest,
    ) -> bool {
        if request.resolved_path().is_some() {
            return true;
        }

        let resolved = match request.kind().request_path() {
            Some(path) => self.resolve(path),
            None => return true,
        };

        match resolved {
            Some(resolved) => {
                request.set_resolved_path(resolved);
                true
            }
            None => false,
        }
    }
}
