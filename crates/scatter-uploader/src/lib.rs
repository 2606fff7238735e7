//! Blob-hosting backends ("uploaders") for Scatter.
//!
//! This crate defines the [`Uploader`] capability trait the transfer engine
//! stores chunks through, along with the concrete backends:
//!
//! - [`MemoryUploader`]: in-process blobs behind a `RwLock<HashMap>`.
//! - [`DirUploader`]: content-addressed files with a 2-level fan-out layout.
//! - [`HttpUploader`]: a generic HTTP host configured by URL and method.
//! - [`ChaosUploader`]: a wrapper injecting latency and transient failures.

mod chaos;
mod dir;
mod error;
mod http;
mod memory;
mod traits;

pub use chaos::ChaosUploader;
pub use dir::DirUploader;
pub use error::UploaderError;
pub use http::{HttpMethod, HttpUploader, HttpUploaderConfig};
pub use memory::MemoryUploader;
pub use traits::{DEFAULT_HEAD, Uploader};
