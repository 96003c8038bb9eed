//! Turns a content provider and a `Range` header into a framed byte stream.
//!
//! Extensions on the passthrough list are served as partial content straight
//! from the provider. Everything else is fed through a [`Transcoder`] from the
//! first byte and served sequentially.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::provider::ContentProvider;
use super::range::ByteRange;
use super::transcode::{ByteStream, OutputFormat, TranscodeError, Transcoder};
use crate::config::{ReelstreamConfig, contains_extension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 206
    PartialContent,
    /// 200, used for transcoded output
    Ok,
}

/// Response metadata accompanying a delivered byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub status: DeliveryStatus,
    pub content_type: String,
    /// `bytes start-end/total`, absent for transcoded output
    pub content_range: Option<String>,
    /// Absent when the output length is unknown
    pub content_length: Option<u64>,
    /// `bytes` or `none`
    pub accept_ranges: &'static str,
}

pub struct Delivery {
    pub framing: Framing,
    pub body: ByteStream,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("requested range is not satisfiable for a {total} byte file")]
    RangeNotSatisfiable { total: u64 },

    #[error("transcoding failed to start: {0}")]
    Transcode(#[from] TranscodeError),
}

/// Serves byte ranges of content providers.
#[derive(Clone)]
pub struct DeliveryAdapter {
    passthrough: Vec<String>,
    transcoder: Arc<dyn Transcoder>,
    chunk_size: usize,
}

impl DeliveryAdapter {
    pub fn new(passthrough: Vec<String>, transcoder: Arc<dyn Transcoder>, chunk_size: usize) -> Self {
        Self {
            passthrough,
            transcoder,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &ReelstreamConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        Self::new(
            config.media.passthrough_extensions.clone(),
            transcoder,
            config.media.chunk_size,
        )
    }

    /// Whether files with `extension` stream without transcoding.
    pub fn is_passthrough(&self, extension: Option<&str>) -> bool {
        extension.is_some_and(|ext| contains_extension(&self.passthrough, ext))
    }

    /// Resolves `range_header` against the provider's declared size and
    /// returns the framed body.
    ///
    /// Reads past what a swarm-backed provider has received wait for the
    /// missing pieces. Dropping the body stops reading and is not an error.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::RangeNotSatisfiable` - The range starts past the end of the file
    /// - `DeliveryError::Transcode` - The transcoder could not be started
    pub fn deliver(
        &self,
        provider: Arc<dyn ContentProvider>,
        range_header: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        let total = provider.size();
        let extension = provider.extension();

        if self.is_passthrough(extension.as_deref()) {
            let range = ByteRange::resolve(range_header, total)
                .map_err(|e| DeliveryError::RangeNotSatisfiable { total: e.total })?;

            debug!(
                name = provider.name(),
                source = %provider.kind(),
                start = range.start,
                end = range.end,
                total,
                "Serving range"
            );

            let content_type = mime_guess::from_path(provider.name())
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            let framing = Framing {
                status: DeliveryStatus::PartialContent,
                content_type,
                content_range: Some(range.content_range(total)),
                content_length: Some(range.len()),
                accept_ranges: "bytes",
            };
            let body = range_stream(provider, range.start, range.end + 1, self.chunk_size);
            return Ok(Delivery { framing, body });
        }

        if range_header.is_some() {
            debug!(name = provider.name(), "Ignoring range for transcoded output");
        }
        info!(
            name = provider.name(),
            extension = extension.as_deref().unwrap_or(""),
            "Transcoding to WebM"
        );

        let input = range_stream(provider, 0, total, self.chunk_size);
        let format = OutputFormat::WebM;
        let body = self.transcoder.transcode(input, format)?;

        Ok(Delivery {
            framing: Framing {
                status: DeliveryStatus::Ok,
                content_type: format.content_type().to_string(),
                content_range: None,
                content_length: None,
                accept_ranges: "none",
            },
            body,
        })
    }
}

struct RangeCursor {
    provider: Arc<dyn ContentProvider>,
    offset: u64,
    end: u64,
    chunk_size: usize,
    done: bool,
}

impl Drop for RangeCursor {
    fn drop(&mut self) {
        if !self.done && self.offset < self.end {
            debug!(
                name = self.provider.name(),
                offset = self.offset,
                end = self.end,
                "Consumer disconnected"
            );
        }
    }
}

/// Streams `[start, end)` of `provider` in chunks of at most `chunk_size`.
fn range_stream(
    provider: Arc<dyn ContentProvider>,
    start: u64,
    end: u64,
    chunk_size: usize,
) -> ByteStream {
    let cursor = RangeCursor {
        provider,
        offset: start,
        end,
        chunk_size,
        done: false,
    };

    stream::unfold(cursor, |mut cursor| async move {
        if cursor.done || cursor.offset >= cursor.end {
            cursor.done = true;
            return None;
        }

        let length = (cursor.end - cursor.offset).min(cursor.chunk_size as u64) as usize;
        match cursor.provider.read_at(cursor.offset, length).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!(
                    name = cursor.provider.name(),
                    offset = cursor.offset,
                    "Source ended before the declared size"
                );
                cursor.done = true;
                None
            }
            Ok(bytes) => {
                cursor.offset += bytes.len() as u64;
                Some((Ok::<Bytes, io::Error>(bytes), cursor))
            }
            Err(e) => {
                warn!(
                    name = cursor.provider.name(),
                    offset = cursor.offset,
                    "Source read failed: {}",
                    e
                );
                cursor.done = true;
                Some((Err(io::Error::from(e)), cursor))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::testing::{MemoryContentProvider, StubTranscoder};

    fn adapter(transcoder: Arc<StubTranscoder>) -> DeliveryAdapter {
        DeliveryAdapter::new(vec!["mp4".into(), "webm".into()], transcoder, 4)
    }

    async fn collect(body: ByteStream) -> Vec<u8> {
        body.map_ok(|chunk| chunk.to_vec()).try_concat().await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_passthrough_range_framing() {
        let provider = Arc::new(MemoryContentProvider::new("movie.mp4", &b"0123456789"[..]));
        let delivery = adapter(Arc::new(StubTranscoder::default()))
            .deliver(provider, Some("bytes=3-8"))
            .unwrap();

        assert_eq!(
            delivery.framing,
            Framing {
                status: DeliveryStatus::PartialContent,
                content_type: "video/mp4".to_string(),
                content_range: Some("bytes 3-8/10".to_string()),
                content_length: Some(6),
                accept_ranges: "bytes",
            }
        );
        assert_eq!(collect(delivery.body).await, b"345678");
    }

    #[tokio::test]
    async fn test_missing_header_serves_whole_file() {
        let provider = Arc::new(MemoryContentProvider::new("movie.webm", &b"abcdefghij"[..]));
        let delivery = adapter(Arc::new(StubTranscoder::default()))
            .deliver(provider, None)
            .unwrap();

        assert_eq!(delivery.framing.content_range.as_deref(), Some("bytes 0-9/10"));
        assert_eq!(delivery.framing.content_type, "video/webm");
        assert_eq!(collect(delivery.body).await, b"abcdefghij");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let provider = Arc::new(MemoryContentProvider::new("movie.mp4", &b"0123"[..]));
        let result = adapter(Arc::new(StubTranscoder::default())).deliver(provider, Some("bytes=4-"));
        assert!(matches!(
            result,
            Err(DeliveryError::RangeNotSatisfiable { total: 4 })
        ));
    }

    #[tokio::test]
    async fn test_other_extensions_are_transcoded_from_start() {
        let transcoder = Arc::new(StubTranscoder::default());
        let provider = Arc::new(MemoryContentProvider::new("Movie.MKV", &b"0123456789"[..]));
        let delivery = adapter(transcoder.clone())
            .deliver(provider, Some("bytes=5-"))
            .unwrap();

        assert_eq!(
            delivery.framing,
            Framing {
                status: DeliveryStatus::Ok,
                content_type: "video/webm".to_string(),
                content_range: None,
                content_length: None,
                accept_ranges: "none",
            }
        );
        let mut expected = StubTranscoder::MARKER.to_vec();
        expected.extend_from_slice(b"0123456789");
        assert_eq!(collect(delivery.body).await, expected);
        assert_eq!(transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_dropping_body_is_not_an_error() {
        let provider = Arc::new(MemoryContentProvider::new("movie.mp4", vec![7u8; 64]));
        let mut body = adapter(Arc::new(StubTranscoder::default()))
            .deliver(provider, None)
            .unwrap()
            .body;

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 4);
        drop(body);
    }
}
