//! Static web page loading.
//!
//! The page is fetched once and never executed. Text extraction is
//! regex-based: `<script>`, `<style>`, `<noscript>` and comments are
//! dropped, then the inner text of every outermost element with the
//! selector's tag name is collected. Same-tag nesting is balanced by depth,
//! so an inner element's text stays part of its outer element.

use std::time::Duration;

use async_trait::async_trait;
use regex::{Captures, Regex};

use super::{check_status, Document, DocumentLoader, LoaderError};

const DEFAULT_SELECTOR: &str = "body";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads the text of a static HTML page.
#[derive(Debug, Clone)]
pub struct WebLoader {
    url: String,
    selector: String,
}

impl WebLoader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: DEFAULT_SELECTOR.to_string(),
        }
    }

    /// Restrict extraction to elements with this tag name, e.g. `"p"`.
    pub fn with_selector(mut self, tag: impl Into<String>) -> Self {
        self.selector = tag.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn validate_url(&self) -> Result<(), LoaderError> {
        let rest = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"));
        match rest {
            Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
            Some(_) => Err(LoaderError::InvalidUrl {
                url: self.url.clone(),
                reason: "missing host".into(),
            }),
            None => Err(LoaderError::InvalidUrl {
                url: self.url.clone(),
                reason: "only http and https URLs are supported".into(),
            }),
        }
    }

    async fn fetch(&self) -> Result<String, LoaderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(super::USER_AGENT)
            .build()
            .map_err(|e| LoaderError::Request {
                url: self.url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let response = http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LoaderError::Request {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        check_status(&self.url, response)
            .await?
            .text()
            .await
            .map_err(|e| LoaderError::UnexpectedResponse {
                url: self.url.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl DocumentLoader for WebLoader {
    async fn load(&self) -> Result<Vec<Document>, LoaderError> {
        self.validate_url()?;
        let extractor = HtmlText::new(&self.selector)?;

        let html = self.fetch().await?;
        let page = extractor.extract(&html);
        tracing::debug!(
            url = %self.url,
            selector = %self.selector,
            chars = page.text.len(),
            "loaded web page"
        );

        let mut doc = Document::new(page.text).with_metadata("source", self.url.clone());
        if let Some(title) = page.title {
            doc = doc.with_metadata("title", title);
        }
        Ok(vec![doc])
    }
}

struct ExtractedPage {
    text: String,
    title: Option<String>,
}

/// Compiled patterns for one tag selector.
struct HtmlText {
    tag: String,
    hidden: Regex,
    /// Opening or closing tag of the selected element.
    tag_edge: Regex,
    title: Regex,
    markup: Regex,
    entity: Regex,
    whitespace: Regex,
}

impl HtmlText {
    fn new(selector: &str) -> Result<Self, LoaderError> {
        let tag = selector.trim().to_ascii_lowercase();
        let valid = tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(LoaderError::InvalidSelector {
                selector: selector.to_string(),
                reason: "expected a single tag name such as `body` or `p`".into(),
            });
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| LoaderError::InvalidSelector {
                selector: selector.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(Self {
            hidden: compile(
                r"(?is)<!--.*?-->|<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>",
            )?,
            tag_edge: compile(&format!(r"(?i)</?{tag}\b[^>]*>"))?,
            title: compile(r"(?is)<title\b[^>]*>(.*?)</title\s*>")?,
            markup: compile(r"(?s)<[^>]*>")?,
            entity: compile(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")?,
            whitespace: compile(r"\s+")?,
            tag,
        })
    }

    fn extract(&self, html: &str) -> ExtractedPage {
        let visible = self.hidden.replace_all(html, " ");

        let title = self
            .title
            .captures(&visible)
            .map(|caps| self.to_text(&caps[1]))
            .filter(|t| !t.is_empty());

        let mut parts: Vec<String> = self
            .outermost_elements(&visible)
            .into_iter()
            .map(|inner| self.to_text(inner))
            .filter(|t| !t.is_empty())
            .collect();

        // Fragments without a <body> still yield their text.
        if parts.is_empty() && self.tag == DEFAULT_SELECTOR {
            parts.push(self.to_text(&visible));
        }

        ExtractedPage {
            text: parts.join("\n"),
            title,
        }
    }

    /// Inner HTML of each outermost selected element. Stray closing tags are
    /// ignored and an element left open runs to the end of the document.
    fn outermost_elements<'h>(&self, html: &'h str) -> Vec<&'h str> {
        let mut inner = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for edge in self.tag_edge.find_iter(html) {
            let tag = edge.as_str();
            if tag.starts_with("</") {
                match depth {
                    0 => {}
                    1 => {
                        inner.push(&html[start..edge.start()]);
                        depth = 0;
                    }
                    _ => depth -= 1,
                }
            } else if !tag.ends_with("/>") {
                if depth == 0 {
                    start = edge.end();
                }
                depth += 1;
            }
        }
        if depth > 0 {
            inner.push(&html[start..]);
        }
        inner
    }

    fn to_text(&self, fragment: &str) -> String {
        let stripped = self.markup.replace_all(fragment, " ");
        let decoded = self.entity.replace_all(&stripped, |caps: &Captures| {
            decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        });
        self.whitespace.replace_all(decoded.trim(), " ").into_owned()
    }
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        _ => return None,
    };
    Some(decoded.to_string())
}
