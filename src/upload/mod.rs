//! Contract-template file uploads.
//!
//! A keyed queue of size-capped files, a semaphore scheduler limiting
//! transfers to three at a time, and an HTTP multipart transport with
//! byte progress and cancellation.

pub mod queue;
pub mod scheduler;
pub mod transport;

pub use queue::{UploadItem, UploadQueue, UploadStatus, MAX_FILE_SIZE};
pub use scheduler::{UploadPermit, UploadScheduler, MAX_PARALLEL_UPLOADS};
pub use transport::{FilePayload, HttpUploadTransport, ProgressFn, UploadTransport};
