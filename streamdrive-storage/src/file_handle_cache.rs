use crate::backend::{is_handle_exhaustion, AsyncReadBackend, NativeFile, OpenFlags};
use crate::statistics::duration_ms;
use std::path::{Path, PathBuf};
use std::time::Instant;
use streamdrive_base::{LruCache, RollingAverage};

pub struct CachedFile {
    file: NativeFile,
    last_used: Instant,
    // Reads currently in flight on this handle. Never evicted or closed while non-zero.
    active_reads: u32,
    // Flushed while reads were in flight, close as soon as they finish
    close_when_idle: bool,
}

impl CachedFile {
    pub fn file(&self) -> &NativeFile {
        &self.file
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn active_reads(&self) -> u32 {
        self.active_reads
    }
}

#[derive(Debug)]
pub enum OpenError {
    // Every cached handle is in use, or the OS is out of handles. Retry later.
    CacheFull,
    NotFound,
    Os(std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Closed,
    // Reads are in flight, the handle closes when the last one finishes
    Deferred,
    NotCached,
}

/// Open native file handles keyed by resolved path. The least recently used idle handle is closed
/// to make room for a new one.
pub struct FileHandleCache {
    cache: LruCache<PathBuf, CachedFile>,
    open_time_ms: RollingAverage,
    close_time_ms: RollingAverage,
    hits: u64,
    misses: u64,
}

impl FileHandleCache {
    pub fn new(
        capacity: u32,
        statistics_window: usize,
    ) -> Self {
        FileHandleCache {
            cache: LruCache::new(capacity),
            open_time_ms: RollingAverage::new(statistics_window),
            close_time_ms: RollingAverage::new(statistics_window),
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.cache.capacity()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn find(
        &self,
        path: &Path,
    ) -> Option<u32> {
        self.cache.find(&path.to_path_buf())
    }

    /// Least recently used slot that is empty or holds an idle handle
    pub fn find_available_slot(&self) -> Option<u32> {
        self.cache
            .find_evictable(|cached| cached.active_reads == 0)
    }

    pub fn entry(
        &self,
        index: u32,
    ) -> Option<&CachedFile> {
        self.cache.slot(index).map(|(_, cached)| cached)
    }

    pub fn file(
        &self,
        index: u32,
    ) -> Option<&NativeFile> {
        self.entry(index).map(|cached| &cached.file)
    }

    /// Opens the file into the least recently used idle slot, closing whatever was there
    pub fn open(
        &mut self,
        backend: &mut dyn AsyncReadBackend,
        path: &Path,
        flags: OpenFlags,
    ) -> Result<u32, OpenError> {
        let index = self.find_available_slot().ok_or(OpenError::CacheFull)?;

        let start = Instant::now();
        let file = match backend.open(path, flags) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(OpenError::NotFound),
            Err(e) if is_handle_exhaustion(&e) => {
                log::warn!("Out of OS file handles opening {:?}, will retry", path);
                return Err(OpenError::CacheFull);
            }
            Err(e) => return Err(OpenError::Os(e)),
        };
        self.open_time_ms.push(duration_ms(start.elapsed()));

        let evicted = self.cache.insert_at(
            index,
            path.to_path_buf(),
            CachedFile {
                file,
                last_used: Instant::now(),
                active_reads: 0,
                close_when_idle: false,
            },
        );

        if let Some((evicted_path, evicted)) = evicted {
            debug_assert_eq!(evicted.active_reads, 0);
            log::debug!("Closing file handle {:?} to open {:?}", evicted_path, path);
            self.close(evicted);
        }

        Ok(index)
    }

    /// Cached handle for the path, opening it if necessary
    pub fn find_or_open(
        &mut self,
        backend: &mut dyn AsyncReadBackend,
        path: &Path,
        flags: OpenFlags,
    ) -> Result<u32, OpenError> {
        if let Some(index) = self.find(path) {
            self.hits += 1;
            self.cache.touch(index);
            if let Some((_, cached)) = self.cache.slot_mut(index) {
                cached.last_used = Instant::now();
            }
            return Ok(index);
        }

        self.misses += 1;
        self.open(backend, path, flags)
    }

    pub fn mark_active(
        &mut self,
        index: u32,
    ) {
        if let Some((_, cached)) = self.cache.slot_mut(index) {
            cached.active_reads += 1;
            cached.last_used = Instant::now();
        }
    }

    pub fn mark_inactive(
        &mut self,
        index: u32,
    ) {
        let close_now = match self.cache.slot_mut(index) {
            Some((_, cached)) => {
                debug_assert!(cached.active_reads > 0);
                cached.active_reads = cached.active_reads.saturating_sub(1);
                cached.last_used = Instant::now();
                cached.active_reads == 0 && cached.close_when_idle
            }
            None => false,
        };

        if close_now {
            if let Some((path, cached)) = self.cache.remove_at(index) {
                log::debug!("Closing flushed file handle {:?}", path);
                self.close(cached);
            }
        }
    }

    /// Closes and forgets the handle for a path. A handle with reads in flight is made unfindable
    /// right away (so new reads open a fresh handle) and closed when the reads finish.
    pub fn flush(
        &mut self,
        path: &Path,
    ) -> FlushOutcome {
        let index = match self.find(path) {
            Some(index) => index,
            None => return FlushOutcome::NotCached,
        };

        self.flush_slot(index)
    }

    fn flush_slot(
        &mut self,
        index: u32,
    ) -> FlushOutcome {
        let active_reads = match self.cache.slot(index) {
            Some((_, cached)) => cached.active_reads,
            None => return FlushOutcome::NotCached,
        };

        if active_reads == 0 {
            if let Some((_, cached)) = self.cache.remove_at(index) {
                self.close(cached);
            }
            FlushOutcome::Closed
        } else {
            let path = self.cache.slot(index).map(|(path, _)| path.clone());
            if let Some(path) = path {
                self.cache.detach(&path);
            }
            if let Some((_, cached)) = self.cache.slot_mut(index) {
                cached.close_when_idle = true;
            }
            FlushOutcome::Deferred
        }
    }

    pub fn flush_all(&mut self) {
        for index in self.cache.occupied_slots() {
            self.flush_slot(index);
        }
    }

    fn close(
        &mut self,
        cached: CachedFile,
    ) {
        let start = Instant::now();
        drop(cached);
        self.close_time_ms.push(duration_ms(start.elapsed()));
    }

    pub fn open_time_ms(&self) -> &RollingAverage {
        &self.open_time_ms
    }

    pub fn close_time_ms(&self) -> &RollingAverage {
        &self.close_time_ms
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
