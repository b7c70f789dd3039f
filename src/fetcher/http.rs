//! HTTP metadata fetcher.
//!
//! Downloads a page and reads OpenGraph / standard `<meta>` tags from its
//! head. Only HTML responses are considered; anything else is a fetch error.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, Url};

use super::{LinkMetadata, MetadataFetcher};
use crate::error::FetchError;

const USER_AGENT: &str = "linkmeta/0.1 (+link preview fetcher)";

/// Only the start of the page is scanned; metadata lives in `<head>`.
const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024;

/// Extracts [`LinkMetadata`] from an HTML document.
#[derive(Debug, Clone)]
pub struct MetadataParser {
    meta_tag: Regex,
    attribute: Regex,
    title: Regex,
}

impl MetadataParser {
    /// Compiles the parser's patterns.
    pub fn new() -> Result<Self, FetchError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| FetchError::Other(format!("invalid regex: {e}")))
        };

        Ok(Self {
            meta_tag: compile(r"(?is)<meta\b[^>]*>")?,
            attribute: compile(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)?,
            title: compile(r"(?is)<title[^>]*>(.*?)</title>")?,
        })
    }

    /// Parses metadata out of `html`.
    pub fn parse(&self, html: &str) -> LinkMetadata {
        let tags = self.meta_tags(html);
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| tags.get(*key))
                .map(|value| decode_entities(value.trim()))
                .filter(|value| !value.is_empty())
        };

        let document_title = self
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| decode_entities(collapse_whitespace(m.as_str()).as_str()))
            .filter(|t| !t.is_empty());

        LinkMetadata {
            title: pick(&["og:title", "twitter:title"]).or(document_title),
            description: pick(&["og:description", "twitter:description", "description"]),
            kind: pick(&["og:type"]),
            image: pick(&["og:image", "og:image:url", "twitter:image"]),
            site_name: pick(&["og:site_name"]),
            canonical_url: pick(&["og:url"]),
        }
    }

    /// Collects `property|name -> content` for every meta tag.
    ///
    /// The first occurrence of a key wins.
    fn meta_tags(&self, html: &str) -> HashMap<String, String> {
        let mut tags = HashMap::new();

        for tag in self.meta_tag.find_iter(html) {
            let mut key = None;
            let mut content = None;

            for caps in self.attribute.captures_iter(tag.as_str()) {
                let name = caps[1].to_ascii_lowercase();
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();

                match name.as_str() {
                    "property" | "name" | "itemprop" if key.is_none() => {
                        key = Some(value.to_ascii_lowercase())
                    }
                    "content" => content = Some(value),
                    _ => {}
                }
            }

            if let (Some(key), Some(content)) = (key, content) {
                tags.entry(key).or_insert(content);
            }
        }

        tags
    }
}

/// Fetches link metadata over HTTP(S).
pub struct HttpMetadataFetcher {
    client: Client,
    parser: MetadataParser,
    max_body_bytes: usize,
}

impl HttpMetadataFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// The worker pool applies its own fetch timeout as well; this one bounds
    /// the HTTP exchange when the fetcher is used on its own.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            parser: MetadataParser::new()?,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Sets how much of the body is scanned for metadata.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<LinkMetadata, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(FetchError::UnsupportedScheme(other.to_string())),
        }

        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::NotHtml(content_type));
        }

        let body = read_body_prefix(response, self.max_body_bytes).await?;
        let metadata = self.parser.parse(&body);

        if metadata.is_empty() {
            return Err(FetchError::NoMetadata(url.to_string()));
        }

        tracing::debug!(url = %url, title = ?metadata.title, "Fetched link metadata");
        Ok(metadata)
    }
}

/// Reads at most `max` bytes of the body, then drops the connection.
///
/// Invalid UTF-8 (including a character cut at the limit) is replaced.
async fn read_body_prefix(mut response: Response, max: usize) -> Result<String, FetchError> {
    let mut bytes = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        if append_limited(&mut bytes, &chunk, max) {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Appends as much of `chunk` as fits under `max`; returns whether `buf` is full.
fn append_limited(buf: &mut Vec<u8>, chunk: &[u8], max: usize) -> bool {
    let remaining = max.saturating_sub(buf.len());
    let take = remaining.min(chunk.len());
    buf.extend_from_slice(&chunk[..take]);
    buf.len() >= max
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    // &amp; last so "&amp;lt;" stays "&lt;".
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> MetadataParser {
        MetadataParser::new().expect("patterns should compile")
    }

    #[test]
    fn test_parse_open_graph_tags() {
        let html = r#"
            <html><head>
              <title>Fallback title</title>
              <meta property="og:title" content="Rust 2024 is out" />
              <meta property="og:description" content="What&#39;s new &amp; changed">
              <meta property="og:type" content="article">
              <meta property="og:image" content="https://img.test/cover.png">
              <meta property="og:site_name" content="Blog">
              <meta property="og:url" content="https://blog.test/rust-2024">
            </head><body></body></html>
        "#;

        let metadata = parser().parse(html);
        assert_eq!(metadata.title.as_deref(), Some("Rust 2024 is out"));
        assert_eq!(metadata.description.as_deref(), Some("What's new & changed"));
        assert_eq!(metadata.kind.as_deref(), Some("article"));
        assert_eq!(metadata.image.as_deref(), Some("https://img.test/cover.png"));
        assert_eq!(metadata.site_name.as_deref(), Some("Blog"));
        assert_eq!(
            metadata.canonical_url.as_deref(),
            Some("https://blog.test/rust-2024")
        );
    }

    #[test]
    fn test_parse_falls_back_to_title_and_description() {
        let html = "<head><TITLE>\n  Plain   page \n</TITLE>\
                    <meta name='Description' content='Just a page'></head>";

        let metadata = parser().parse(html);
        assert_eq!(metadata.title.as_deref(), Some("Plain page"));
        assert_eq!(metadata.description.as_deref(), Some("Just a page"));
        assert!(metadata.kind.is_none());
    }

    #[test]
    fn test_parse_attribute_order_does_not_matter() {
        let html = r#"<meta content="Reversed" property="og:title">"#;
        let metadata = parser().parse(html);
        assert_eq!(metadata.title.as_deref(), Some("Reversed"));
    }

    #[test]
    fn test_parse_first_tag_wins() {
        let html = r#"<meta property="og:title" content="First">
                      <meta property="og:title" content="Second">"#;
        let metadata = parser().parse(html);
        assert_eq!(metadata.title.as_deref(), Some("First"));
    }

    #[test]
    fn test_parse_ignores_empty_values() {
        let html = r#"<title>Real</title><meta property="og:title" content="   ">"#;
        let metadata = parser().parse(html);
        assert_eq!(metadata.title.as_deref(), Some("Real"));
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(parser().parse("<html><body>nothing</body></html>").is_empty());
    }

    #[test]
    fn test_append_limited() {
        let mut buf = Vec::new();
        assert!(!append_limited(&mut buf, b"hello", 8));
        assert!(append_limited(&mut buf, b"world", 8));
        assert_eq!(buf, b"hellowor");

        // Already full: nothing more is taken.
        assert!(append_limited(&mut buf, b"!", 8));
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b"), "a & b");
        assert_eq!(decode_entities("&lt;tag&gt;"), "<tag>");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_urls() {
        let fetcher =
            HttpMetadataFetcher::new(Duration::from_secs(1)).expect("client should build");

        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));

        let err = fetcher.fetch("ftp://files.test/a").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(ref s) if s == "ftp"));
    }

    /// Serves one chunked HTML response whose body never ends.
    async fn spawn_endless_server(head: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let headers = "HTTP/1.1 200 OK\r\n\
                           Content-Type: text/html; charset=utf-8\r\n\
                           Transfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(headers.as_bytes()).await.is_err() {
                return;
            }

            let first = format!("{:x}\r\n{}\r\n", head.len(), head);
            if socket.write_all(first.as_bytes()).await.is_err() {
                return;
            }

            let filler = "<p>filler</p>".repeat(64);
            let chunk = format!("{:x}\r\n{}\r\n", filler.len(), filler);
            // Until the client hangs up.
            while socket.write_all(chunk.as_bytes()).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_fetch_stops_reading_at_body_limit() {
        let url =
            spawn_endless_server("<html><head><title>Endless page</title></head><body>").await;
        let fetcher = HttpMetadataFetcher::new(Duration::from_secs(5))
            .expect("client should build")
            .with_max_body_bytes(1024);

        let started = std::time::Instant::now();
        let metadata = fetcher.fetch(&url).await.expect("metadata from the first chunk");

        assert_eq!(metadata.title.as_deref(), Some("Endless page"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
