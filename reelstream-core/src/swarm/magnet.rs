//! Magnet locators for catalog variants.

use std::fmt;

use url::Url;

use super::{InfoHash, SwarmError};
use crate::catalog::TorrentVariant;

const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed `magnet:?xt=urn:btih:...` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLocator {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl MagnetLocator {
    /// Builds a locator from a bare info hash.
    ///
    /// # Errors
    /// - `SwarmError::MalformedLocator` - `hash` is not 40 hex characters
    pub fn build(hash: &str, title: &str, trackers: &[String]) -> Result<Self, SwarmError> {
        let info_hash = InfoHash::from_hex(hash)?;
        let display_name = (!title.is_empty()).then(|| title.to_string());
        Ok(Self {
            info_hash,
            display_name,
            trackers: trackers.to_vec(),
        })
    }

    /// Parses a magnet URI.
    ///
    /// Only hex `urn:btih` topics are accepted.
    ///
    /// # Errors
    /// - `SwarmError::MalformedLocator` - Not a magnet URI or no usable info hash
    pub fn parse(uri: &str) -> Result<Self, SwarmError> {
        magnet_url::Magnet::new(uri).map_err(|e| SwarmError::MalformedLocator {
            reason: format!("invalid magnet link: {e}"),
        })?;

        let url = Url::parse(uri).map_err(|e| SwarmError::MalformedLocator {
            reason: format!("invalid magnet link: {e}"),
        })?;
        if url.scheme() != "magnet" {
            return Err(SwarmError::MalformedLocator {
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "xt" => {
                    if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(InfoHash::from_hex(hash)?);
                    }
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| SwarmError::MalformedLocator {
            reason: "missing urn:btih exact topic".to_string(),
        })?;

        Ok(Self {
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Locator for a catalog variant.
    ///
    /// The variant's own magnet `url` wins; otherwise one is built from its
    /// hash, the movie title and the bootstrap trackers.
    ///
    /// # Errors
    /// - `SwarmError::MalformedLocator` - Neither the url nor the hash is usable
    pub fn for_variant(
        variant: &TorrentVariant,
        title: &str,
        trackers: &[String],
    ) -> Result<Self, SwarmError> {
        match variant.url.as_deref() {
            Some(url) if url.starts_with("magnet:") => Self::parse(url),
            _ => Self::build(&variant.hash, title, trackers),
        }
    }
}

impl fmt::Display for MagnetLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "magnet:?xt={BTIH_PREFIX}{}", self.info_hash)?;
        if let Some(name) = &self.display_name {
            write!(f, "&dn={}", urlencoding::encode(name))?;
        }
        for tracker in &self.trackers {
            write!(f, "&tr={}", urlencoding::encode(tracker))?;
        }
        Ok(())
    }
}
