use std::path::{Path, PathBuf};
use streamdrive_base::hashing::HashMap;

/// File sizes keyed by resolved path. Fixed capacity ring: once full, each insert overwrites the
/// oldest entry regardless of how recently it was used.
pub struct MetaDataCache {
    entries: Vec<Option<(PathBuf, u64)>>,
    lookup: HashMap<PathBuf, usize>,
    // Next slot to write
    cursor: usize,
}

impl MetaDataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        MetaDataCache {
            entries: (0..capacity).map(|_| None).collect(),
            lookup: HashMap::default(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn find(
        &self,
        path: &Path,
    ) -> Option<usize> {
        self.lookup.get(path).copied()
    }

    pub fn size_at(
        &self,
        index: usize,
    ) -> Option<u64> {
        self.entries
            .get(index)
            .and_then(|entry| entry.as_ref())
            .map(|(_, size)| *size)
    }

    pub fn get(
        &self,
        path: &Path,
    ) -> Option<u64> {
        self.find(path).and_then(|index| self.size_at(index))
    }

    /// Records the size of a file. A path that is already cached is updated in place and keeps its
    /// position in the ring.
    pub fn insert(
        &mut self,
        path: &Path,
        size: u64,
    ) -> usize {
        if let Some(index) = self.find(path) {
            if let Some((_, cached_size)) = &mut self.entries[index] {
                *cached_size = size;
            }
            return index;
        }

        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.entries.len();

        if let Some((overwritten, _)) = self.entries[index].take() {
            log::trace!("Metadata for {:?} overwritten", overwritten);
            self.lookup.remove(&overwritten);
        }

        self.lookup.insert(path.to_path_buf(), index);
        self.entries[index] = Some((path.to_path_buf(), size));
        index
    }

    pub fn invalidate(
        &mut self,
        path: &Path,
    ) -> bool {
        match self.lookup.remove(path) {
            Some(index) => {
                self.entries[index] = None;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.lookup.clear();
        self.cursor = 0;
    }
}
