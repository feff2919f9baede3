#![warn(missing_docs)]
//! Content-addressed checkpoint archive storage.
//!
//! A checkpoint is a gzip-compressed tar of a sandbox workspace, indexed by
//! the SHA-256 hash of its compressed bytes. Dedup is by hash; identity
//! (`id`) is always fresh, so two checkpoints with identical contents share
//! a `hash` but never an `id`.

pub mod archive;
pub mod store;

pub use archive::{build_archive, extract_archive, extract_matching};
pub use store::{FilesystemCheckpointStore, ListFilter, PutOptions};
