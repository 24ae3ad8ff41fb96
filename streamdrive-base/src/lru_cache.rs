use crate::hashing::HashMap;
use std::hash::Hash;

#[derive(Copy, Clone)]
struct LruCacheNode {
    next: u32,
    previous: u32,
}

/// Fixed capacity LRU cache backed by an arena of slots. Slot indices are stable for the lifetime
/// of an entry, so callers may hold on to an index (for example while an IO operation is using the
/// value stored there) and access it again without a key lookup.
pub struct LruCache<K, V> {
    // Doubly linked list with u32::MAX for "null" and using indices instead of pointers
    lru_list_head: u32,
    lru_list_tail: u32,
    lru_list: Vec<LruCacheNode>,

    // Slots that line up with the doubly linked list
    lru_list_pairs: Vec<Option<(K, V)>>,

    // Lookup for the index a key is stored at. Detached slots are occupied but not in here.
    lookup: HashMap<K, u32>,
}

impl<K: Clone + PartialEq + Eq + Hash, V> LruCache<K, V> {
    pub fn new(size: u32) -> LruCache<K, V> {
        assert!(size >= 2);
        let mut lru_list = vec![LruCacheNode { next: 0, previous: 0 }; size as usize];
        lru_list[0].previous = u32::MAX;
        lru_list[0].next = 1;
        for i in 1..(size - 1) {
            lru_list[i as usize].previous = i - 1;
            lru_list[i as usize].next = i + 1;
        }
        lru_list[size as usize - 1].previous = size - 2;
        lru_list[size as usize - 1].next = u32::MAX;

        let mut lru_list_pairs = Vec::with_capacity(size as usize);
        for _ in 0..size {
            lru_list_pairs.push(None);
        }

        let lookup = HashMap::default();

        LruCache {
            lru_list_head: 0,
            lru_list_tail: size - 1,
            lru_list,
            lru_list_pairs,
            lookup,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.lru_list.len() as u32
    }

    // Number of keys that can currently be found. Detached slots are not counted.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    fn move_to_front(
        &mut self,
        node_index: u32,
    ) {
        let node = self.lru_list[node_index as usize];

        if node_index == self.lru_list_head {
            // Do nothing if already at head
            assert_eq!(node.previous, u32::MAX);
            assert_ne!(node.next, u32::MAX);
            return;
        }

        if node_index == self.lru_list_tail {
            // If we are the tail, make the node previous to us the new tail
            assert_eq!(node.next, u32::MAX);
            assert_ne!(node.previous, u32::MAX);
            self.lru_list_tail = node.previous;
        }

        // splice this node out of the list.
        assert_ne!(node.previous, u32::MAX);
        self.lru_list[node.previous as usize].next = node.next;
        if node.next != u32::MAX {
            self.lru_list[node.next as usize].previous = node.previous;
        }

        // Make this node the new head
        assert_eq!(self.lru_list[self.lru_list_head as usize].previous, u32::MAX);
        self.lru_list[self.lru_list_head as usize].previous = node_index;
        self.lru_list[node_index as usize].previous = u32::MAX;
        self.lru_list[node_index as usize].next = self.lru_list_head;
        self.lru_list_head = node_index;
    }

    fn move_to_back(
        &mut self,
        node_index: u32,
    ) {
        let node = self.lru_list[node_index as usize];

        if node_index == self.lru_list_tail {
            // Do nothing if we are already the tail
            assert_eq!(node.next, u32::MAX);
            assert_ne!(node.previous, u32::MAX);
            return;
        }

        if node_index == self.lru_list_head {
            // If we are the head, make the node next/after us the new head
            assert_eq!(node.previous, u32::MAX);
            assert_ne!(node.next, u32::MAX);
            self.lru_list_head = node.next;
        }

        // splice this node out of the list.
        if node.previous != u32::MAX {
            self.lru_list[node.previous as usize].next = node.next;
        }
        assert_ne!(node.next, u32::MAX);
        self.lru_list[node.next as usize].previous = node.previous;

        // Make this node the new tail
        assert_eq!(self.lru_list[self.lru_list_tail as usize].next, u32::MAX);
        self.lru_list[self.lru_list_tail as usize].next = node_index;
        self.lru_list[node_index as usize].previous = self.lru_list_tail;
        self.lru_list[node_index as usize].next = u32::MAX;
        self.lru_list_tail = node_index;
    }

    /// Returns the slot index a key is stored at without changing its position in the LRU order
    pub fn find(
        &self,
        k: &K,
    ) -> Option<u32> {
        self.lookup.get(k).copied()
    }

    /// Marks the slot as most recently used
    pub fn touch(
        &mut self,
        index: u32,
    ) {
        self.move_to_front(index);
    }

    pub fn slot(
        &self,
        index: u32,
    ) -> Option<(&K, &V)> {
        self.lru_list_pairs[index as usize]
            .as_ref()
            .map(|(k, v)| (k, v))
    }

    pub fn slot_mut(
        &mut self,
        index: u32,
    ) -> Option<(&K, &mut V)> {
        self.lru_list_pairs[index as usize]
            .as_mut()
            .map(|(k, v)| (&*k, v))
    }

    /// Walks from least to most recently used and returns the first slot that is either empty or
    /// holds a value the predicate allows to be evicted.
    pub fn find_evictable<F: Fn(&V) -> bool>(
        &self,
        can_evict: F,
    ) -> Option<u32> {
        let mut iter = self.lru_list_tail;
        while iter != u32::MAX {
            match &self.lru_list_pairs[iter as usize] {
                None => return Some(iter),
                Some((_, v)) if can_evict(v) => return Some(iter),
                _ => {}
            }
            iter = self.lru_list[iter as usize].previous;
        }

        None
    }

    /// Stores the pair in the given slot and marks it most recently used. Whatever was in the slot
    /// before is returned.
    pub fn insert_at(
        &mut self,
        index: u32,
        k: K,
        v: V,
    ) -> Option<(K, V)> {
        debug_assert!(self.lookup.get(&k).map_or(true, |&existing| existing == index));
        let evicted = self.lru_list_pairs[index as usize].take();
        if let Some((old_k, _)) = &evicted {
            if self.lookup.get(old_k) == Some(&index) {
                self.lookup.remove(old_k);
            }
        }

        self.move_to_front(index);
        self.lookup.insert(k.clone(), index);
        self.lru_list_pairs[index as usize] = Some((k, v));
        evicted
    }

    /// Empties the slot and moves it to the back so it is the first to be reused
    pub fn remove_at(
        &mut self,
        index: u32,
    ) -> Option<(K, V)> {
        let pair = self.lru_list_pairs[index as usize].take();
        if let Some((k, _)) = &pair {
            if self.lookup.get(k) == Some(&index) {
                self.lookup.remove(k);
            }
            self.move_to_back(index);
        }
        pair
    }

    /// Makes the key unfindable while leaving the slot occupied. The slot is released later with
    /// `remove_at`, or reused once `find_evictable` allows it.
    pub fn detach(
        &mut self,
        k: &K,
    ) -> Option<u32> {
        self.lookup.remove(k)
    }

    /// Indices of every occupied slot, detached or not
    pub fn occupied_slots(&self) -> Vec<u32> {
        self.lru_list_pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| pair.is_some())
            .map(|(index, _)| index as u32)
            .collect()
    }
}
