//! Manifest serialization.
//!
//! Layout: one version byte followed by the postcard-encoded body. The
//! version byte is checked before the body is touched, so a manifest written
//! by a newer format is rejected instead of being misread.

use scatter_types::{MANIFEST_VERSION, Manifest, chunk_count};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

#[derive(Serialize)]
struct ManifestBodyRef<'a> {
    chunk_size: u32,
    file_size: u64,
    locators: &'a [String],
}

#[derive(Deserialize)]
struct ManifestBody {
    chunk_size: u32,
    file_size: u64,
    locators: Vec<String>,
}

/// Serialize a manifest.
///
/// Only [`MANIFEST_VERSION`] can be written. The locators must satisfy the
/// manifest invariant: one non-empty locator per chunk.
pub fn encode_manifest(
    chunk_size: u32,
    version: u8,
    locators: &[String],
    file_size: u64,
) -> Result<Vec<u8>, FormatError> {
    if version != MANIFEST_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            supported: MANIFEST_VERSION,
        });
    }
    validate(chunk_size, file_size, locators)?;

    let body = postcard::to_allocvec(&ManifestBodyRef {
        chunk_size,
        file_size,
        locators,
    })
    .map_err(|e| FormatError::Serialization(e.to_string()))?;

    let mut out = Vec::with_capacity(1 + body.len());
    out.push(version);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a manifest.
///
/// Rejects unknown versions, truncated or trailing bytes, and manifests whose
/// locator count does not match their sizes.
pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest, FormatError> {
    let (&version, body) = bytes.split_first().ok_or(FormatError::Truncated("manifest"))?;
    if version != MANIFEST_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            supported: MANIFEST_VERSION,
        });
    }

    let (decoded, rest): (ManifestBody, &[u8]) =
        postcard::take_from_bytes(body).map_err(|e| FormatError::Serialization(e.to_string()))?;
    if !rest.is_empty() {
        return Err(FormatError::Serialization(format!(
            "{} trailing bytes after manifest",
            rest.len()
        )));
    }

    validate(decoded.chunk_size, decoded.file_size, &decoded.locators)?;

    Ok(Manifest {
        version,
        chunk_size: decoded.chunk_size,
        file_size: decoded.file_size,
        locators: decoded.locators,
    })
}

fn validate(chunk_size: u32, file_size: u64, locators: &[String]) -> Result<(), FormatError> {
    if chunk_size == 0 {
        return Err(FormatError::Inconsistent("chunk size is zero".into()));
    }
    let expected = chunk_count(file_size, chunk_size);
    if locators.len() != expected {
        return Err(FormatError::Inconsistent(format!(
            "{} locators for {file_size} bytes in {chunk_size}-byte chunks, expected {expected}",
            locators.len()
        )));
    }
    if let Some(index) = locators.iter().position(|l| l.is_empty()) {
        return Err(FormatError::Inconsistent(format!(
            "empty locator at index {index}"
        )));
    }
    Ok(())
}
