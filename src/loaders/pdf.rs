//! PDF loading via `lopdf`.
//!
//! Text extraction is best-effort: a page whose text cannot be decoded
//! yields an empty string and a warning rather than failing the whole file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use super::{Document, DocumentLoader, LoaderError};

/// Loads a PDF, one document per page by default.
#[derive(Debug, Clone)]
pub struct PdfLoader {
    path: PathBuf,
    split_pages: bool,
}

impl PdfLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            split_pages: true,
        }
    }

    /// `false` joins all pages into a single document.
    pub fn split_pages(mut self, split_pages: bool) -> Self {
        self.split_pages = split_pages;
        self
    }
}

struct ParsedPdf {
    version: String,
    pages: Vec<String>,
}

fn parse_pdf(bytes: &[u8], path: &str) -> Result<ParsedPdf, LoaderError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| LoaderError::Pdf {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let pages = doc
        .get_pages()
        .into_keys()
        .map(|page_number| {
            doc.extract_text(&[page_number]).unwrap_or_else(|e| {
                tracing::warn!(path, page_number, error = %e, "failed to extract page text");
                String::new()
            })
        })
        .collect();

    Ok(ParsedPdf {
        version: doc.version.clone(),
        pages,
    })
}

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| LoaderError::io(&self.path, e))?;
        let source = self.path.display().to_string();

        let parse_source = source.clone();
        let parsed = tokio::task::spawn_blocking(move || parse_pdf(&bytes, &parse_source))
            .await
            .map_err(|e| LoaderError::Task {
                reason: e.to_string(),
            })??;

        let total_pages = parsed.pages.len();
        let pdf_meta = json!({ "version": parsed.version, "totalPages": total_pages });
        tracing::debug!(path = %source, total_pages, split = self.split_pages, "loaded PDF");

        if !self.split_pages {
            let text = parsed.pages.join("\n\n");
            return Ok(vec![Document::new(text)
                .with_metadata("source", source)
                .with_metadata("pdf", pdf_meta)]);
        }

        Ok(parsed
            .pages
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                Document::new(text)
                    .with_metadata("source", source.clone())
                    .with_metadata("pdf", pdf_meta.clone())
                    .with_metadata("loc", json!({ "pageNumber": idx + 1 }))
            })
            .collect())
    }
}
