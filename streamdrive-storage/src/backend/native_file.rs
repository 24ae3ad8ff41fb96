use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Default)]
pub struct OpenFlags {
    pub unbuffered: bool,
    pub sharing: bool,
}

/// An open file shared between the handle cache and any in-flight reads on it. The OS handle is
/// closed when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct NativeFile {
    file: Arc<File>,
    size: u64,
    unbuffered: bool,
}

impl NativeFile {
    pub fn open(
        path: &Path,
        flags: OpenFlags,
    ) -> std::io::Result<NativeFile> {
        let mut options = OpenOptions::new();
        options.read(true);
        apply_share_mode(&mut options, flags.sharing);

        let (file, unbuffered) = if flags.unbuffered {
            match open_unbuffered(&options, path) {
                Ok(file) => (file, true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(e),
                Err(e) => {
                    // Some filesystems (tmpfs for example) reject unbuffered IO
                    log::warn!(
                        "Unbuffered open of {:?} failed, falling back to buffered IO: {}",
                        path,
                        e
                    );
                    (options.open(path)?, false)
                }
            }
        } else {
            (options.open(path)?, false)
        };

        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(not_a_file(path));
        }

        Ok(NativeFile {
            file: Arc::new(file),
            size: metadata.len(),
            unbuffered,
        })
    }

    pub fn stat(path: &Path) -> std::io::Result<u64> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(not_a_file(path));
        }

        Ok(metadata.len())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// False if unbuffered IO was requested but the filesystem didn't support it
    pub fn is_unbuffered(&self) -> bool {
        self.unbuffered
    }

    /// Positioned read that doesn't move a shared cursor, so many reads may run on one handle at
    /// once. Returns fewer bytes than requested only at end of file.
    pub fn read_at(
        &self,
        buffer: &mut [u8],
        offset: u64,
    ) -> std::io::Result<usize> {
        if self.unbuffered {
            // Retrying a short unbuffered read would use an unaligned offset
            return positioned_read(&self.file, buffer, offset);
        }

        let mut total = 0;
        while total < buffer.len() {
            match positioned_read(&self.file, &mut buffer[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }
}

fn not_a_file(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{:?} is not a regular file", path),
    )
}

#[cfg(unix)]
fn positioned_read(
    file: &File,
    buffer: &mut [u8],
    offset: u64,
) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buffer, offset)
}

#[cfg(windows)]
fn positioned_read(
    file: &File,
    buffer: &mut [u8],
    offset: u64,
) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buffer, offset)
}

#[cfg(target_os = "linux")]
fn open_unbuffered(
    options: &OpenOptions,
    path: &Path,
) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut options = options.clone();
    options.custom_flags(libc::O_DIRECT);
    options.open(path)
}

#[cfg(windows)]
fn open_unbuffered(
    options: &OpenOptions,
    path: &Path,
) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_FLAG_NO_BUFFERING: u32 = 0x20000000;
    let mut options = options.clone();
    options.custom_flags(FILE_FLAG_NO_BUFFERING);
    options.open(path)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn open_unbuffered(
    _options: &OpenOptions,
    _path: &Path,
) -> std::io::Result<File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "unbuffered reads are not supported on this platform",
    ))
}

#[cfg(windows)]
fn apply_share_mode(
    options: &mut OpenOptions,
    sharing: bool,
) {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_SHARE_READ: u32 = 0x1;
    const FILE_SHARE_WRITE: u32 = 0x2;
    const FILE_SHARE_DELETE: u32 = 0x4;
    if sharing {
        options.share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE);
    } else {
        options.share_mode(FILE_SHARE_READ);
    }
}

// Other platforms don't lock files that are open for reading
#[cfg(not(windows))]
fn apply_share_mode(
    _options: &mut OpenOptions,
    _sharing: bool,
) {
}

/// Open failures caused by running out of OS handles. These are retried rather than failing the
/// request.
pub(crate) fn is_handle_exhaustion(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(error.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
    }

    #[cfg(windows)]
    {
        const ERROR_TOO_MANY_OPEN_FILES: i32 = 4;
        error.raw_os_error() == Some(ERROR_TOO_MANY_OPEN_FILES)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = error;
        false
    }
}

/// Failures to start a read that say nothing about the file itself, only that the OS is briefly
/// out of some resource. The read is issued again on a later tick.
pub(crate) fn is_transient_issue_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        error.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::OutOfMemory
    ) {
        return true;
    }

    #[cfg(unix)]
    {
        matches!(
            error.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::ENOMEM) | Some(libc::ENOBUFS)
        )
    }

    #[cfg(windows)]
    {
        const ERROR_NOT_ENOUGH_MEMORY: i32 = 8;
        const ERROR_NO_SYSTEM_RESOURCES: i32 = 1450;
        const ERROR_NOT_ENOUGH_QUOTA: i32 = 1816;
        matches!(
            error.raw_os_error(),
            Some(ERROR_NOT_ENOUGH_MEMORY) | Some(ERROR_NO_SYSTEM_RESOURCES) | Some(ERROR_NOT_ENOUGH_QUOTA)
        )
    }

    #[cfg(not(any(unix, windows)))]
    {
        false
    }
}
