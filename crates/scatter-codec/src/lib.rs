//! Byte-level codecs for Scatter.
//!
//! This crate provides:
//! - [`split`] and [`ChunkReader`]: fixed-size chunking of in-memory and streamed data.
//! - [`encode_manifest`] / [`decode_manifest`]: the versioned binary manifest format.
//! - [`encode_share`] / [`decode_share`]: the verbose and compact share code forms.
//! - [`seal`] / [`unseal`]: the `head ++ obfuscated payload` blob layout every
//!   chunk and manifest is stored in.

mod chunker;
mod error;
mod manifest;
mod seal;
mod share;

pub use chunker::{Chunk, ChunkReader, split};
pub use error::FormatError;
pub use manifest::{decode_manifest, encode_manifest};
pub use seal::{NONCE_LEN, SEAL_OVERHEAD, TAG_LEN, seal, sealed_len, unseal};
pub use share::{COMPACT_PREFIX, VERBOSE_PREFIX, decode_share, encode_share};
