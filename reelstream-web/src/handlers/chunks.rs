//! Byte-range streaming endpoint.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reelstream_core::DownloadKey;
use reelstream_core::streaming::{DeliveryStatus, Framing};
use tracing::debug;

use super::error::ApiError;
use crate::server::AppState;

/// Raw `Range` header value, if it is valid ASCII.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

/// `GET /video/chunks/{id}/{resolution}`
///
/// Streams from the finished file or the live session, whichever the
/// selector picks. Requests past the downloaded head wait for the pieces.
pub async fn video_chunks(
    State(state): State<AppState>,
    Path((id, resolution)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = DownloadKey::new(id, resolution);
    let range = extract_range_header(&headers);

    let provider = state.selector.resolve(&key).await?;
    debug!(%key, source = %provider.kind(), ?range, "Delivering chunks");
    let delivery = state.delivery.deliver(provider, range)?;

    Ok(build_response(&delivery.framing, Body::from_stream(delivery.body)))
}

fn build_response(framing: &Framing, body: Body) -> Response {
    let status = match framing.status {
        DeliveryStatus::PartialContent => StatusCode::PARTIAL_CONTENT,
        DeliveryStatus::Ok => StatusCode::OK,
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &framing.content_type)
        .header(header::ACCEPT_RANGES, framing.accept_ranges)
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(content_range) = &framing.content_range {
        response = response.header(header::CONTENT_RANGE, content_range);
    }
    if let Some(length) = framing.content_length {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    response
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_extract_range_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_range_header(&headers), None);

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-1023"));
        assert_eq!(extract_range_header(&headers), Some("bytes=0-1023"));
    }

    #[test]
    fn test_transcoded_framing_has_no_length() {
        let framing = Framing {
            status: DeliveryStatus::Ok,
            content_type: "video/webm".to_string(),
            content_range: None,
            content_length: None,
            accept_ranges: "none",
        };
        let response = build_response(&framing, Body::empty());

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "none");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    }
}
