use crate::{StorageDriveError, StorageDriveResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_CACHED_FILE_HANDLES: u32 = 32;
pub const DEFAULT_MAX_CACHED_METADATA: u32 = 256;
pub const DEFAULT_PHYSICAL_SECTOR_SIZE: u32 = 4096;
pub const DEFAULT_LOGICAL_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_IO_CHANNEL_COUNT: u32 = 4;
pub const DEFAULT_MAX_PARALLEL_REQUESTS: u32 = 32;
pub const DEFAULT_AVERAGE_SEEK_TIME_MS: f64 = 8.0;
pub const DEFAULT_READ_BYTES_PER_SECOND: f64 = 50.0 * 1024.0 * 1024.0;
pub const DEFAULT_THROUGHPUT_WINDOW: usize = 32;

#[derive(Serialize, Deserialize)]
pub struct NamePathPairJson {
    pub name: String,
    pub path: String,
}

fn default_max_cached_file_handles() -> u32 {
    DEFAULT_MAX_CACHED_FILE_HANDLES
}

fn default_max_cached_metadata() -> u32 {
    DEFAULT_MAX_CACHED_METADATA
}

fn default_physical_sector_size() -> u32 {
    DEFAULT_PHYSICAL_SECTOR_SIZE
}

fn default_logical_sector_size() -> u32 {
    DEFAULT_LOGICAL_SECTOR_SIZE
}

fn default_io_channel_count() -> u32 {
    DEFAULT_IO_CHANNEL_COUNT
}

fn default_max_parallel_requests() -> u32 {
    DEFAULT_MAX_PARALLEL_REQUESTS
}

fn default_average_seek_time_ms() -> f64 {
    DEFAULT_AVERAGE_SEEK_TIME_MS
}

fn default_read_bytes_per_second() -> f64 {
    DEFAULT_READ_BYTES_PER_SECOND
}

fn default_throughput_window() -> usize {
    DEFAULT_THROUGHPUT_WINDOW
}

#[derive(Serialize, Deserialize)]
pub struct StorageDriveConfigJson {
    pub drives: Vec<NamePathPairJson>,
    #[serde(default = "default_max_cached_file_handles")]
    pub max_cached_file_handles: u32,
    #[serde(default = "default_max_cached_metadata")]
    pub max_cached_metadata: u32,
    #[serde(default = "default_physical_sector_size")]
    pub physical_sector_size: u32,
    #[serde(default = "default_logical_sector_size")]
    pub logical_sector_size: u32,
    #[serde(default = "default_io_channel_count")]
    pub io_channel_count: u32,
    #[serde(default = "default_max_parallel_requests")]
    pub max_parallel_requests: u32,
    #[serde(default)]
    pub over_commit: i32,
    #[serde(default = "default_average_seek_time_ms")]
    pub average_seek_time_ms: f64,
    #[serde(default = "default_read_bytes_per_second")]
    pub default_read_bytes_per_second: f64,
    #[serde(default = "default_throughput_window")]
    pub throughput_window: usize,
    #[serde(default)]
    pub has_seek_penalty: bool,
    #[serde(default)]
    pub enable_unbuffered_reads: bool,
    #[serde(default)]
    pub enable_sharing: bool,
    #[serde(default)]
    pub minimal_reporting: bool,
}

/// A logical volume served by a drive. Requests may name the drive instead of an absolute path.
#[derive(Debug, Clone)]
pub struct DriveMount {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageDriveFlags {
    // Device is slower at random access than sequential access (spinning disk, optical)
    pub has_seek_penalty: bool,
    // Bypass the OS page cache. Reads must then be sector aligned.
    pub enable_unbuffered_reads: bool,
    // Allow other processes to write/delete files while we hold them open (windows only)
    pub enable_sharing: bool,
    // Only report averages, skip counters
    pub minimal_reporting: bool,
}

#[derive(Debug, Clone)]
pub struct StorageDriveConfig {
    // Volumes served by this device. At least one must be usable at construction.
    pub drives: Vec<DriveMount>,

    pub max_cached_file_handles: u32,
    pub max_cached_metadata: u32,

    // Unbuffered reads are aligned to the physical sector size
    pub physical_sector_size: u32,
    pub logical_sector_size: u32,

    // Native queue depth of the device. Also the number of read slots, after clamping to
    // max_parallel_requests
    pub io_channel_count: u32,
    pub max_parallel_requests: u32,
    // Positive keeps the device saturated, negative leaves headroom for other processes
    pub over_commit: i32,

    pub average_seek_time: Duration,
    // Throughput assumed before any read has completed
    pub default_read_bytes_per_second: f64,
    // Number of recent reads used for throughput and timing averages
    pub throughput_window: usize,

    pub flags: StorageDriveFlags,
}

impl StorageDriveConfig {
    pub fn new(drives: Vec<DriveMount>) -> Self {
        StorageDriveConfig {
            drives,
            max_cached_file_handles: DEFAULT_MAX_CACHED_FILE_HANDLES,
            max_cached_metadata: DEFAULT_MAX_CACHED_METADATA,
            physical_sector_size: DEFAULT_PHYSICAL_SECTOR_SIZE,
            logical_sector_size: DEFAULT_LOGICAL_SECTOR_SIZE,
            io_channel_count: DEFAULT_IO_CHANNEL_COUNT,
            max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
            over_commit: 0,
            average_seek_time: Duration::from_secs_f64(DEFAULT_AVERAGE_SEEK_TIME_MS / 1000.0),
            default_read_bytes_per_second: DEFAULT_READ_BYTES_PER_SECOND,
            throughput_window: DEFAULT_THROUGHPUT_WINDOW,
            flags: StorageDriveFlags::default(),
        }
    }

    /// Convenience for a device serving a single directory
    pub fn single_drive(
        name: &str,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(vec![DriveMount {
            name: name.to_string(),
            path: path.into(),
        }])
    }

    /// Number of read slots (in-flight native reads) the drive will allocate
    pub fn read_slot_count(&self) -> usize {
        self.io_channel_count.min(self.max_parallel_requests).max(1) as usize
    }

    /// Alignment required of offset, length and address for unbuffered reads
    pub fn unbuffered_alignment(&self) -> u64 {
        self.physical_sector_size as u64
    }

    pub fn validate(&self) -> StorageDriveResult<()> {
        if self.drives.is_empty() {
            return Err(StorageDriveError::InvalidConfig(
                "at least one drive path is required".to_string(),
            ));
        }

        if self.max_cached_file_handles < 2 {
            return Err(StorageDriveError::InvalidConfig(
                "max_cached_file_handles must be at least 2".to_string(),
            ));
        }

        if self.max_cached_metadata == 0 {
            return Err(StorageDriveError::InvalidConfig(
                "max_cached_metadata must be non-zero".to_string(),
            ));
        }

        if !self.physical_sector_size.is_power_of_two()
            || !self.logical_sector_size.is_power_of_two()
        {
            return Err(StorageDriveError::InvalidConfig(format!(
                "sector sizes must be powers of two (physical: {}, logical: {})",
                self.physical_sector_size, self.logical_sector_size
            )));
        }

        if self.physical_sector_size % self.logical_sector_size != 0 {
            return Err(StorageDriveError::InvalidConfig(format!(
                "physical sector size {} is not a multiple of logical sector size {}",
                self.physical_sector_size, self.logical_sector_size
            )));
        }

        if self.io_channel_count == 0 || self.max_parallel_requests == 0 {
            return Err(StorageDriveError::InvalidConfig(
                "io_channel_count and max_parallel_requests must be non-zero".to_string(),
            ));
        }

        if !(self.default_read_bytes_per_second.is_finite()
            && self.default_read_bytes_per_second > 0.0)
        {
            return Err(StorageDriveError::InvalidConfig(
                "default_read_bytes_per_second must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn unverified_absolute_path(
        root_path: &Path,
        json_path: &str,
    ) -> PathBuf {
        if Path::new(json_path).is_absolute() {
            PathBuf::from(json_path)
        } else {
            root_path.join(json_path)
        }
    }

    // root_path is the directory relative drive paths in the json are resolved against
    pub fn from_json_str(
        root_path: &Path,
        json: &str,
    ) -> StorageDriveResult<Self> {
        let config_file: StorageDriveConfigJson = serde_json::from_str(json)?;

        let mut drives = Vec::default();
        for pair in config_file.drives {
            drives.push(DriveMount {
                name: pair.name,
                path: Self::unverified_absolute_path(root_path, &pair.path),
            });
        }

        if !config_file.average_seek_time_ms.is_finite() || config_file.average_seek_time_ms < 0.0
        {
            return Err(StorageDriveError::InvalidConfig(
                "average_seek_time_ms must be a non-negative number".to_string(),
            ));
        }

        let config = StorageDriveConfig {
            drives,
            max_cached_file_handles: config_file.max_cached_file_handles,
            max_cached_metadata: config_file.max_cached_metadata,
            physical_sector_size: config_file.physical_sector_size,
            logical_sector_size: config_file.logical_sector_size,
            io_channel_count: config_file.io_channel_count,
            max_parallel_requests: config_file.max_parallel_requests,
            over_commit: config_file.over_commit,
            average_seek_time: Duration::from_secs_f64(config_file.average_seek_time_ms / 1000.0),
            default_read_bytes_per_second: config_file.default_read_bytes_per_second,
            throughput_window: config_file.throughput_window,
            flags: StorageDriveFlags {
                has_seek_penalty: config_file.has_seek_penalty,
                enable_unbuffered_reads: config_file.enable_unbuffered_reads,
                enable_sharing: config_file.enable_sharing,
                minimal_reporting: config_file.minimal_reporting,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn read_from_path(path: &Path) -> StorageDriveResult<Self> {
        let root_path = dunce::canonicalize(path.parent().ok_or_else(|| {
            "Parent of drive config file path could not be found".to_string()
        })?)?;
        let file_contents = std::fs::read_to_string(path)?;
        log::info!("Using drive configuration at {:?}", path);
        Self::from_json_str(&root_path, &file_contents)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_defaults_are_applied() {
        let root = Path::new("/streams");
        let config = StorageDriveConfig::from_json_str(
            root,
            r#"{ "drives": [ { "name": "data", "path": "build_data" } ], "over_commit": -1 }"#,
        )
        .unwrap();

        assert_eq!(config.drives.len(), 1);
        assert_eq!(config.drives[0].name, "data");
        assert_eq!(config.drives[0].path, root.join("build_data"));
        assert_eq!(config.max_cached_file_handles, DEFAULT_MAX_CACHED_FILE_HANDLES);
        assert_eq!(config.io_channel_count, DEFAULT_IO_CHANNEL_COUNT);
        assert_eq!(config.over_commit, -1);
        assert!(!config.flags.has_seek_penalty);
        assert_eq!(config.average_seek_time.as_millis(), 8);
    }

    #[test]
    fn read_slots_are_clamped_to_platform_cap() {
        let mut config = StorageDriveConfig::single_drive("data", "/streams");
        config.io_channel_count = 64;
        config.max_parallel_requests = 8;
        assert_eq!(config.read_slot_count(), 8);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut config = StorageDriveConfig::single_drive("data", "/streams");
        assert!(config.validate().is_ok());

        config.physical_sector_size = 3000;
        assert!(config.validate().is_err());
        config.physical_sector_size = 256;
        config.logical_sector_size = 512;
        assert!(config.validate().is_err());

        let config = StorageDriveConfig::new(vec![]);
        assert!(config.validate().is_err());

        assert!(StorageDriveConfig::from_json_str(Path::new("/"), "{ not json").is_err());
    }

    #[test]
    fn read_from_path_resolves_relative_drives() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("drive.json");
        std::fs::write(
            &config_path,
            r#"{ "drives": [ { "name": "data", "path": "content" } ], "has_seek_penalty": true }"#,
        )
        .unwrap();

        let config = StorageDriveConfig::read_from_path(&config_path).unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        assert_eq!(config.drives[0].path, root.join("content"));
        assert!(config.flags.has_seek_penalty);
    }
}
