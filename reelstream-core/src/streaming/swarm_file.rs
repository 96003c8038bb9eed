//! Content provider over a live swarm session's selected file.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::provider::{ContentProvider, ProviderError, SourceKind};
use crate::session::ContentFile;

/// Reads from the in-progress swarm buffer, waiting for pieces as needed.
#[derive(Debug)]
pub struct SwarmFileProvider {
    file: Arc<ContentFile>,
    name: String,
}

impl SwarmFileProvider {
    pub fn new(file: Arc<ContentFile>) -> Self {
        let name = file.name();
        Self { file, name }
    }
}

#[async_trait]
impl ContentProvider for SwarmFileProvider {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ProviderError> {
        let size = self.file.length();
        if offset > size {
            return Err(ProviderError::OutOfBounds { offset, size });
        }
        Ok(self.file.read_at(offset, length).await?)
    }

    fn size(&self) -> u64 {
        self.file.length()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Swarm
    }
}
