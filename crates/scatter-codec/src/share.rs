//! Share code encoding.
//!
//! Two textual forms carry the same [`ShareDescriptor`]:
//!
//! - **verbose**: `scatter://share?v=1&n=<name>&s=<size>&h=<head>&u=<url>&k=<hex key>&r=<referer>`,
//!   form-urlencoded so any field content survives.
//! - **compact**: `sc:` + base64url(postcard(fields) ++ blake3(fields)[..4]).
//!
//! [`decode_share`] detects the form from the prefix, and also finds a code
//! embedded in surrounding text such as a pasted chat message.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use scatter_types::{SHARE_CODE_VERSION, ShareDescriptor, ShareKey};

use crate::error::FormatError;

/// Prefix of the verbose form.
pub const VERBOSE_PREFIX: &str = "scatter://share?";

/// Prefix of the compact form.
pub const COMPACT_PREFIX: &str = "sc:";

const CHECKSUM_LEN: usize = 4;

/// Field order of the compact form.
type CompactFields = (u8, String, u64, u32, String, ShareKey, String);

/// Encode a descriptor as a share code.
pub fn encode_share(descriptor: &ShareDescriptor, compact: bool) -> String {
    if compact {
        encode_compact(descriptor)
    } else {
        encode_verbose(descriptor)
    }
}

/// Decode a share code in either form.
pub fn decode_share(text: &str) -> Result<ShareDescriptor, FormatError> {
    let token = text
        .split_whitespace()
        .find(|t| t.starts_with(VERBOSE_PREFIX) || t.starts_with(COMPACT_PREFIX))
        .ok_or(FormatError::UnrecognizedShareCode)?;

    if let Some(query) = token.strip_prefix(VERBOSE_PREFIX) {
        decode_verbose(query)
    } else if let Some(packed) = token.strip_prefix(COMPACT_PREFIX) {
        decode_compact(packed)
    } else {
        Err(FormatError::UnrecognizedShareCode)
    }
}

// ---------------------------------------------------------------------------
// Verbose form
// ---------------------------------------------------------------------------

fn encode_verbose(d: &ShareDescriptor) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("v", &SHARE_CODE_VERSION.to_string())
        .append_pair("n", &d.file_name)
        .append_pair("s", &d.file_size.to_string())
        .append_pair("h", &d.head_size.to_string())
        .append_pair("u", &d.url)
        .append_pair("k", &d.key.to_string())
        .append_pair("r", &d.referer)
        .finish();
    format!("{VERBOSE_PREFIX}{query}")
}

fn decode_verbose(query: &str) -> Result<ShareDescriptor, FormatError> {
    let fields: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let get = |field: &'static str| {
        fields
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| FormatError::InvalidField {
                field,
                reason: "missing".into(),
            })
    };

    let version: u8 = parse_number("v", get("v")?)?;
    if version != SHARE_CODE_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            supported: SHARE_CODE_VERSION,
        });
    }

    let key_bytes = hex::decode(get("k")?).map_err(|e| FormatError::InvalidField {
        field: "k",
        reason: e.to_string(),
    })?;
    let key = ShareKey::from_slice(&key_bytes).ok_or_else(|| FormatError::InvalidField {
        field: "k",
        reason: format!("expected 32 bytes, got {}", key_bytes.len()),
    })?;

    Ok(ShareDescriptor {
        file_name: get("n")?.to_string(),
        file_size: parse_number("s", get("s")?)?,
        head_size: parse_number("h", get("h")?)?,
        url: non_empty("u", get("u")?)?.to_string(),
        key,
        referer: get("r")?.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, FormatError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| FormatError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str, FormatError> {
    if value.is_empty() {
        return Err(FormatError::InvalidField {
            field,
            reason: "empty".into(),
        });
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Compact form
// ---------------------------------------------------------------------------

fn encode_compact(d: &ShareDescriptor) -> String {
    let fields = (
        SHARE_CODE_VERSION,
        d.file_name.as_str(),
        d.file_size,
        d.head_size,
        d.url.as_str(),
        &d.key,
        d.referer.as_str(),
    );
    // Strings, integers and a fixed-size array cannot fail to serialize.
    let mut body = postcard::to_allocvec(&fields).unwrap_or_default();
    let checksum = blake3::hash(&body);
    body.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);
    format!("{COMPACT_PREFIX}{}", URL_SAFE_NO_PAD.encode(body))
}

fn decode_compact(packed: &str) -> Result<ShareDescriptor, FormatError> {
    let raw = URL_SAFE_NO_PAD
        .decode(packed)
        .map_err(|e| FormatError::Serialization(e.to_string()))?;
    if raw.len() <= CHECKSUM_LEN {
        return Err(FormatError::Truncated("share code"));
    }

    let (body, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if &blake3::hash(body).as_bytes()[..CHECKSUM_LEN] != checksum {
        return Err(FormatError::Checksum);
    }

    // The version leads the body as a single raw byte.
    if body[0] != SHARE_CODE_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: body[0],
            supported: SHARE_CODE_VERSION,
        });
    }

    let (_, file_name, file_size, head_size, url, key, referer): CompactFields =
        postcard::from_bytes(body).map_err(|e| FormatError::Serialization(e.to_string()))?;
    non_empty("u", &url)?;

    Ok(ShareDescriptor {
        file_name,
        file_size,
        head_size,
        url,
        key,
        referer,
    })
}
