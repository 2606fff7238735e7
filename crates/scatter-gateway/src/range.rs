//! `Range` request header parsing.
//!
//! Only single `bytes=` ranges are honoured. Anything else (other units,
//! multiple ranges, unparsable values) is ignored and the whole file is
//! served, which RFC 9110 permits.

use scatter_types::ByteRange;

/// Outcome of evaluating a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range; serve everything with 200.
    Full,
    /// Serve this part with 206.
    Partial(ByteRange),
    /// Syntactically valid but outside the file; answer 416.
    Unsatisfiable,
}

/// Evaluate the value of a `Range` header for a file of `size` bytes.
pub fn parse_range(header: &str, size: u64) -> RangeRequest {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the last `n` bytes.
        let Ok(n) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if n == 0 || size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial(ByteRange {
            start: size.saturating_sub(n),
            end: size,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if last.is_empty() {
        size
    } else {
        let Ok(last) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if last < start {
            return RangeRequest::Full;
        }
        last.saturating_add(1).min(size)
    };

    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial(ByteRange { start, end })
}

/// `Content-Range` value for a partial response.
pub fn content_range(range: ByteRange, size: u64) -> String {
    format!("bytes {}-{}/{size}", range.start, range.end - 1)
}
