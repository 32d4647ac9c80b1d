//! GitHub repository loading through the REST contents API.
//!
//! Directories are listed breadth-first, then file bodies are downloaded
//! with bounded concurrency. Unauthenticated requests work but are heavily
//! rate limited, so `GITHUB_ACCESS_TOKEN` is picked up when set.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use super::{check_status, Document, DocumentLoader, LoaderError};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const ACCESS_TOKEN_ENV: &str = "GITHUB_ACCESS_TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// One entry of a contents listing.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubRepoLoader {
    repo_url: String,
    branch: String,
    recursive: bool,
    ignore_paths: Vec<String>,
    access_token: Option<String>,
    api_url: String,
}

impl GithubRepoLoader {
    /// `repo_url` looks like `https://github.com/owner/repo`.
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            recursive: true,
            ignore_paths: Vec::new(),
            access_token: std::env::var(ACCESS_TOKEN_ENV)
                .ok()
                .filter(|t| !t.trim().is_empty()),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Gitignore-like patterns: `node_modules`, `.md`, `*.json`, `docs/`.
    pub fn ignore_paths<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_paths = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Override the token taken from `GITHUB_ACCESS_TOKEN`; `None` disables auth.
    pub fn access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// Point at a GitHub Enterprise (or test) API root.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn http_client(&self) -> Result<HttpClient, LoaderError> {
        HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(super::USER_AGENT)
            .build()
            .map_err(|e| LoaderError::Request {
                url: self.api_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn list(
        &self,
        http: &HttpClient,
        owner: &str,
        repo: &str,
        dir: &str,
    ) -> Result<Vec<ContentEntry>, LoaderError> {
        let mut url = format!("{}/repos/{owner}/{repo}/contents", self.api_url);
        if !dir.is_empty() {
            url.push('/');
            url.push_str(&encode_path(dir));
        }

        let request = http
            .get(&url)
            .query(&[("ref", self.branch.as_str())])
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| LoaderError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        check_status(&url, response)
            .await?
            .json()
            .await
            .map_err(|e| LoaderError::UnexpectedResponse {
                url,
                reason: format!("expected a directory listing: {e}"),
            })
    }

    /// Download one file; `None` when it is not valid UTF-8.
    async fn fetch_file(
        &self,
        http: &HttpClient,
        path: String,
        url: String,
    ) -> Result<Option<Document>, LoaderError> {
        let response = self
            .authorized(http.get(&url))
            .send()
            .await
            .map_err(|e| LoaderError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let bytes = check_status(&url, response)
            .await?
            .bytes()
            .await
            .map_err(|e| LoaderError::UnexpectedResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let Ok(text) = String::from_utf8(bytes.to_vec()) else {
            tracing::warn!(path = %path, "skipping non-UTF-8 file");
            return Ok(None);
        };

        Ok(Some(
            Document::new(text)
                .with_metadata("source", path)
                .with_metadata("repository", self.repo_url.clone())
                .with_metadata("branch", self.branch.clone()),
        ))
    }
}

#[async_trait]
impl DocumentLoader for GithubRepoLoader {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        let (owner, repo) = parse_repo_url(&self.repo_url)?;
        let patterns: Vec<IgnorePattern> = self
            .ignore_paths
            .iter()
            .filter_map(|p| IgnorePattern::parse(p))
            .collect();
        let http = self.http_client()?;

        let mut files = Vec::new();
        let mut pending = VecDeque::from([String::new()]);
        while let Some(dir) = pending.pop_front() {
            for entry in self.list(&http, &owner, &repo, &dir).await? {
                let is_dir = entry.kind == "dir";
                if patterns.iter().any(|p| p.matches(&entry.path, is_dir)) {
                    tracing::debug!(path = %entry.path, "ignored");
                    continue;
                }
                match (entry.kind.as_str(), entry.download_url) {
                    ("dir", _) if self.recursive => pending.push_back(entry.path),
                    ("file", Some(url)) => files.push((entry.path, url)),
                    ("file", None) => {
                        tracing::warn!(path = %entry.path, "file has no download URL, skipping")
                    }
                    _ => {}
                }
            }
        }

        let http = &http;
        let downloaded: Vec<Option<Document>> = stream::iter(files)
            .map(|(path, url)| self.fetch_file(http, path, url))
            .buffered(MAX_CONCURRENT_DOWNLOADS)
            .try_collect()
            .await?;
        let documents: Vec<Document> = downloaded.into_iter().flatten().collect();

        tracing::info!(
            repository = %self.repo_url,
            branch = %self.branch,
            documents = documents.len(),
            "loaded GitHub repository"
        );
        Ok(documents)
    }
}

/// Split `https://github.com/owner/repo[.git][/...]` into owner and repo.
/// Percent-encode each segment of a repository path, keeping the `/`
/// separators. Only RFC 3986 unreserved bytes stay literal.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn parse_repo_url(url: &str) -> Result<(String, String), LoaderError> {
    let invalid = |reason: &str| LoaderError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| invalid("expected an http(s) repository URL"))?;

    let mut segments = rest.split('/').filter(|s| !s.is_empty()).skip(1);
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(invalid("expected https://<host>/<owner>/<repo>")),
    }
}

/// A single gitignore-style pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IgnorePattern {
    glob: String,
    dir_only: bool,
    anchored: bool,
}

impl IgnorePattern {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let dir_only = trimmed.ends_with('/');
        let body = trimmed.trim_end_matches('/');
        let anchored = body.contains('/');
        let glob = body.trim_start_matches('/');
        if glob.is_empty() {
            return None;
        }
        Some(Self {
            glob: glob.to_string(),
            dir_only,
            anchored,
        })
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }

        if self.anchored {
            return wildcard_match(&self.glob, path)
                || path
                    .strip_prefix(self.glob.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
        }

        if path.split('/').any(|part| wildcard_match(&self.glob, part)) {
            return true;
        }

        // `.md` also ignores every Markdown file.
        let is_extension = self.glob.starts_with('.') && !self.glob.contains(['*', '?']);
        let name = path.rsplit('/').next().unwrap_or(path);
        is_extension && !is_dir && name.len() > self.glob.len() && name.ends_with(&self.glob)
    }
}

/// `*` matches any run of characters, `?` exactly one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
