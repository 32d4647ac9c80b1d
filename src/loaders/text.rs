//! Single text file loading.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Document, DocumentLoader, LoaderError};

/// Loads a UTF-8 text file as one document.
#[derive(Debug, Clone)]
pub struct TextLoader {
    path: PathBuf,
}

impl TextLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LoaderError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), chars = text.len(), "loaded text file");
        Ok(vec![
            Document::new(text).with_metadata("source", self.path.display().to_string())
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poem.txt");
        std::fs::write(&path, "Clear water, small stones.\n").unwrap();

        let docs = TextLoader::new(&path).load().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].page_content, "Clear water, small stones.\n");
        assert_eq!(docs[0].source(), Some(path.display().to_string().as_str()));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = TextLoader::new("/nonexistent/chatchain/none.txt")
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Io { .. }));
    }

    #[tokio::test]
    async fn test_non_utf8_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            TextLoader::new(&path).load().await,
            Err(LoaderError::Io { .. })
        ));
    }
}
