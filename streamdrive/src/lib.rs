#[cfg(feature = "streamdrive-base")]
pub use streamdrive_base as base;

#[cfg(feature = "streamdrive-storage")]
pub use streamdrive_storage as storage;
