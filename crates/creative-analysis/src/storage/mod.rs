pub mod blob;
pub mod gcs;
pub mod scratch;

pub use blob::{local_extension, BlobError, BlobStore, LocalBlobStore, StorageUri};
pub use gcs::GcsBlobStore;
pub use scratch::{ScratchArea, ScratchHandle};
