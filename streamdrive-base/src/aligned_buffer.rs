use std::alloc::{Layout, LayoutError};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Zero-initialized heap memory whose address is a multiple of `alignment`. Unbuffered reads
/// require the destination address, file offset and length to all be sector aligned, and a
/// `Vec<u8>` makes no promise about its address.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The allocation is uniquely owned
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Fails if alignment is not a power of two
    pub fn new(
        len: usize,
        alignment: usize,
    ) -> Result<Self, LayoutError> {
        // Never allocate zero bytes, the allocator does not support it
        let size = align_up(len.max(1) as u64, alignment.max(1) as u64) as usize;
        let layout = Layout::from_size_align(size, alignment)?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => std::alloc::handle_alloc_error(layout),
        };

        Ok(AlignedBuffer { ptr, len, layout })
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.layout.align())
            .finish()
    }
}

// alignment must be a power of two for these helpers
pub fn align_down(
    value: u64,
    alignment: u64,
) -> u64 {
    value & !(alignment - 1)
}

pub fn align_up(
    value: u64,
    alignment: u64,
) -> u64 {
    align_down(value + alignment - 1, alignment)
}

pub fn is_aligned(
    value: u64,
    alignment: u64,
) -> bool {
    value & (alignment - 1) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffer_address_is_aligned() {
        for &alignment in &[512, 4096] {
            let buffer = AlignedBuffer::new(100, alignment).unwrap();
            assert_eq!(buffer.len(), 100);
            assert!(is_aligned(buffer.as_ptr() as u64, alignment as u64));
            assert!(buffer.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn zero_length_buffer() {
        let buffer = AlignedBuffer::new(0, 512).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(AlignedBuffer::new(64, 500).is_err());
    }

    #[test]
    fn rounding() {
        assert_eq!(align_down(1000, 512), 512);
        assert_eq!(align_up(1000, 512), 1024);
        assert_eq!(align_up(1024, 512), 1024);
        assert_eq!(align_down(0, 4096), 0);
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(8193, 4096));
    }
}
