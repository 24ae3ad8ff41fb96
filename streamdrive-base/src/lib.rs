pub mod aligned_buffer;
pub mod hashing;
pub mod lru_cache;
mod rolling_average;

pub use aligned_buffer::AlignedBuffer;
pub use lru_cache::LruCache;
pub use rolling_average::RollingAverage;
