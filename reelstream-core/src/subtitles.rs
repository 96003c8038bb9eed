//! Subtitle track metadata for catalog items.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One subtitle track offered for a movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// ISO 639-1 language code
    pub language: String,
    #[serde(default)]
    pub label: Option<String>,
    pub url: String,
    /// `vtt` or `srt`
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Subtitle request failed: {reason}")]
    Request { reason: String },

    #[error("Subtitle service answered {status}")]
    Status { status: u16 },

    #[error("Subtitle response could not be parsed: {reason}")]
    Parse { reason: String },
}

/// Source of subtitle metadata keyed by IMDb id.
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    /// Lists subtitle tracks for `imdb_id`.
    ///
    /// # Errors
    ///
    /// - `SubtitleError` - The backing service failed or answered garbage
    async fn subtitles(&self, imdb_id: &str) -> Result<Vec<SubtitleTrack>, SubtitleError>;
}

/// Provider used when no subtitle service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubtitles;

#[async_trait]
impl SubtitleProvider for NoSubtitles {
    async fn subtitles(&self, _imdb_id: &str) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        Ok(Vec::new())
    }
}

/// Fetches `GET {base_url}/subtitles?imdb_id=...` and expects a JSON array of
/// tracks, or an object with a `subtitles` array.
#[derive(Debug, Clone)]
pub struct HttpSubtitleProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubtitleResponse {
    List(Vec<SubtitleTrack>),
    Envelope { subtitles: Vec<SubtitleTrack> },
}

impl HttpSubtitleProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request_url(&self, imdb_id: &str) -> String {
        format!(
            "{}/subtitles?imdb_id={}",
            self.base_url,
            urlencoding::encode(imdb_id)
        )
    }
}

#[async_trait]
impl SubtitleProvider for HttpSubtitleProvider {
    async fn subtitles(&self, imdb_id: &str) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        let url = self.request_url(imdb_id);
        debug!(%url, "Fetching subtitles");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SubtitleError::Request {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SubtitleError::Status {
                status: response.status().as_u16(),
            });
        }

        let body: SubtitleResponse = response.json().await.map_err(|e| SubtitleError::Parse {
            reason: e.to_string(),
        })?;

        Ok(match body {
            SubtitleResponse::List(tracks) => tracks,
            SubtitleResponse::Envelope { subtitles } => subtitles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        let provider = HttpSubtitleProvider::new("http://subs.local/api/");
        assert_eq!(
            provider.request_url("tt0111161"),
            "http://subs.local/api/subtitles?imdb_id=tt0111161"
        );
    }

    #[test]
    fn test_response_shapes() {
        let list = r#"[{"language": "en", "url": "http://subs/en.vtt"}]"#;
        let envelope = r#"{"subtitles": [{"language": "fr", "label": "Français", "url": "http://subs/fr.vtt", "format": "vtt"}]}"#;

        match serde_json::from_str::<SubtitleResponse>(list).unwrap() {
            SubtitleResponse::List(tracks) => assert_eq!(tracks[0].language, "en"),
            SubtitleResponse::Envelope { .. } => panic!("expected a list"),
        }
        match serde_json::from_str::<SubtitleResponse>(envelope).unwrap() {
            SubtitleResponse::Envelope { subtitles } => {
                assert_eq!(subtitles[0].format.as_deref(), Some("vtt"));
            }
            SubtitleResponse::List(_) => panic!("expected an envelope"),
        }
    }

    #[tokio::test]
    async fn test_no_subtitles() {
        assert!(NoSubtitles.subtitles("tt1").await.unwrap().is_empty());
    }
}
