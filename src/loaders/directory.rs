//! Directory loading: walk a tree and dispatch each file by extension.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{Document, DocumentLoader, LoaderError};

/// Builds the loader for one file.
pub type LoaderFactory = Arc<dyn Fn(&Path) -> Box<dyn DocumentLoader> + Send + Sync>;

/// What to do with a file whose extension has no registered loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownHandling {
    Ignore,
    #[default]
    Warn,
    Error,
}

pub struct DirectoryLoader {
    dir: PathBuf,
    loaders: HashMap<String, LoaderFactory>,
    recursive: bool,
    unknown: UnknownHandling,
}

/// `".TXT"` and `"txt"` both become `"txt"`.
fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

impl DirectoryLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            loaders: HashMap::new(),
            recursive: true,
            unknown: UnknownHandling::default(),
        }
    }

    /// Register a loader for an extension (`".txt"` or `"txt"`).
    pub fn with_loader<F, L>(mut self, extension: &str, factory: F) -> Self
    where
        F: Fn(&Path) -> L + Send + Sync + 'static,
        L: DocumentLoader + 'static,
    {
        let factory: LoaderFactory =
            Arc::new(move |path: &Path| -> Box<dyn DocumentLoader> { Box::new(factory(path)) });
        self.loaders.insert(normalize_extension(extension), factory);
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn unknown(mut self, unknown: UnknownHandling) -> Self {
        self.unknown = unknown;
        self
    }

    /// Regular files under the directory, sorted by path.
    fn list_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, LoaderError> {
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| LoaderError::Walk {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

impl fmt::Debug for DirectoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut extensions: Vec<&String> = self.loaders.keys().collect();
        extensions.sort();
        f.debug_struct("DirectoryLoader")
            .field("dir", &self.dir)
            .field("extensions", &extensions)
            .field("recursive", &self.recursive)
            .field("unknown", &self.unknown)
            .finish()
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        let metadata = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| LoaderError::io(&self.dir, e))?;
        if !metadata.is_dir() {
            return Err(LoaderError::Walk {
                path: self.dir.display().to_string(),
                reason: "not a directory".into(),
            });
        }

        let dir = self.dir.clone();
        let recursive = self.recursive;
        let files = tokio::task::spawn_blocking(move || Self::list_files(&dir, recursive))
            .await
            .map_err(|e| LoaderError::Task {
                reason: e.to_string(),
            })??;

        let mut documents = Vec::new();
        let mut skipped = 0usize;
        for path in files {
            let extension = path
                .extension()
                .map(|e| normalize_extension(&e.to_string_lossy()))
                .unwrap_or_default();

            let Some(factory) = self.loaders.get(&extension) else {
                match self.unknown {
                    UnknownHandling::Ignore => {}
                    UnknownHandling::Warn => {
                        tracing::warn!(path = %path.display(), "no loader for file, skipping")
                    }
                    UnknownHandling::Error => {
                        return Err(LoaderError::UnsupportedExtension {
                            path: path.display().to_string(),
                        })
                    }
                }
                skipped += 1;
                continue;
            };

            documents.extend(factory(&path).load().await?);
        }

        tracing::info!(
            dir = %self.dir.display(),
            documents = documents.len(),
            skipped,
            "loaded directory"
        );
        Ok(documents)
    }
}
