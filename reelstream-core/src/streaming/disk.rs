//! Content provider over a file in the media directory.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::provider::{ContentProvider, ProviderError, SourceKind};

/// Reads byte ranges from an on-disk file.
#[derive(Debug)]
pub struct DiskFileProvider {
    path: PathBuf,
    name: String,
    size: u64,
    file: Mutex<File>,
}

impl DiskFileProvider {
    /// Opens `path` and records its current size.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - The file cannot be opened or inspected
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            size,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentProvider for DiskFileProvider {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ProviderError> {
        if offset > self.size {
            return Err(ProviderError::OutOfBounds {
                offset,
                size: self.size,
            });
        }

        let length = (length as u64).min(self.size - offset) as usize;
        let mut buf = vec![0u8; length];

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Disk
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_reads_are_clamped_to_file_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Movie.MP4");
        std::fs::write(&path, b"0123456789").unwrap();

        let provider = DiskFileProvider::open(&path).await.unwrap();
        assert_eq!(provider.size(), 10);
        assert_eq!(provider.extension().as_deref(), Some("mp4"));
        assert_eq!(provider.kind(), SourceKind::Disk);

        assert_eq!(&provider.read_at(2, 3).await.unwrap()[..], b"234");
        assert_eq!(&provider.read_at(8, 100).await.unwrap()[..], b"89");
        assert!(provider.read_at(10, 4).await.unwrap().is_empty());
        assert!(matches!(
            provider.read_at(11, 1).await,
            Err(ProviderError::OutOfBounds { .. })
        ));
    }
}
