//! HTTP `Range` header resolution (RFC 7233, single byte ranges).

use thiserror::Error;

/// Inclusive byte range resolved against a declared file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

/// The requested range starts past the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("range not satisfiable for a {total} byte file")]
pub struct RangeNotSatisfiable {
    pub total: u64,
}

impl ByteRange {
    /// Resolves an optional `Range` header against `total` bytes.
    ///
    /// A missing header, another unit, multiple ranges or a malformed range set
    /// all select the whole file. An omitted end runs to `total - 1` and an
    /// end past the file is clamped.
    ///
    /// # Examples
    /// ```
    /// use reelstream_core::streaming::ByteRange;
    ///
    /// let range = ByteRange::resolve(Some("bytes=500-"), 1000).unwrap();
    /// assert_eq!((range.start, range.end, range.len()), (500, 999, 500));
    /// ```
    ///
    /// # Errors
    ///
    /// - `RangeNotSatisfiable` - The range starts at or past `total`, or the file is empty
    pub fn resolve(header: Option<&str>, total: u64) -> Result<Self, RangeNotSatisfiable> {
        if total == 0 {
            return Err(RangeNotSatisfiable { total });
        }
        let whole = Self {
            start: 0,
            end: total - 1,
        };

        let Some(ranges) = header
            .map(str::trim)
            .and_then(|h| h.strip_prefix("bytes="))
        else {
            return Ok(whole);
        };
        if ranges.contains(',') {
            return Ok(whole);
        }
        let Some((start_str, end_str)) = ranges.split_once('-') else {
            return Ok(whole);
        };
        let (start_str, end_str) = (start_str.trim(), end_str.trim());

        if start_str.is_empty() {
            // Suffix form: the last N bytes
            let Ok(suffix) = end_str.parse::<u64>() else {
                return Ok(whole);
            };
            if suffix == 0 {
                return Err(RangeNotSatisfiable { total });
            }
            return Ok(Self {
                start: total - suffix.min(total),
                end: total - 1,
            });
        }

        let Ok(start) = start_str.parse::<u64>() else {
            return Ok(whole);
        };
        let end = if end_str.is_empty() {
            total - 1
        } else {
            match end_str.parse::<u64>() {
                Ok(end) if end >= start => end.min(total - 1),
                _ => return Ok(whole),
            }
        };

        if start >= total {
            return Err(RangeNotSatisfiable { total });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Never true; a resolved range holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for this range of a `total` byte file.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}
