//! Document loaders: turn files, directories, web pages and repositories
//! into [`Document`]s.

pub mod directory;
pub mod document;
pub mod errors;
pub mod github;
pub mod pdf;
pub mod text;
pub mod web;

use async_trait::async_trait;

pub use directory::{DirectoryLoader, LoaderFactory, UnknownHandling};
pub use document::Document;
pub use errors::LoaderError;
pub use github::GithubRepoLoader;
pub use pdf::PdfLoader;
pub use text::TextLoader;
pub use web::WebLoader;

pub(crate) const USER_AGENT: &str = concat!("chatchain/", env!("CARGO_PKG_VERSION"));

/// A source of documents.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>, LoaderError>;
}

#[async_trait]
impl<L: DocumentLoader + ?Sized> DocumentLoader for Box<L> {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        (**self).load().await
    }
}

/// Turn a non-2xx response into [`LoaderError::HttpStatus`].
pub(crate) async fn check_status(
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LoaderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LoaderError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}
