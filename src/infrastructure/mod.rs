//! Adapters for the domain ports.

pub mod clock;
pub mod collaborators;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
