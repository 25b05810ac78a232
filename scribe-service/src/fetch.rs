//! Fetching readable text from reference links.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{RetrievalError, ServiceError, ServiceResult};
use crate::retrieval::ContentFetcher;

/// How many paragraphs of a page are kept
const MAX_PARAGRAPHS: usize = 10;

/// Plain HTTP GET with title and paragraph extraction
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, link: &str) -> ServiceResult<String> {
        let response = self
            .client
            .get(link)
            .send()
            .await
            .map_err(|e| RetrievalError::Connection {
                url: link.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::Retrieval(RetrievalError::Upstream {
                status: response.status().as_u16(),
                message: format!("GET {}", link),
            }));
        }

        let html = response
            .text()
            .await
            .map_err(|e| RetrievalError::Connection {
                url: link.to_string(),
                source: e,
            })?;

        Ok(extract_readable_text(&html))
    }
}

/// `"{title}\n{first paragraphs}"`, trimmed
pub fn extract_readable_text(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let lower = html.to_ascii_lowercase();

    let title = element_bodies(html, &lower, "title")
        .into_iter()
        .next()
        .map(strip_html_tags)
        .unwrap_or_default();

    let paragraphs = element_bodies(html, &lower, "p")
        .into_iter()
        .take(MAX_PARAGRAPHS)
        .map(strip_html_tags)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    format!("{}\n{}", title, paragraphs).trim().to_string()
}

/// Inner HTML of every `<tag ...>...</tag>` element, in document order
fn element_bodies<'a>(html: &'a str, lower: &str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut bodies = Vec::new();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(&open) {
        let start = cursor + found;
        let after_name = start + open.len();

        // Reject longer tag names such as <pre> when looking for <p>
        let boundary = lower[after_name..].chars().next();
        if !matches!(boundary, Some('>') | Some('/')) && !boundary.is_some_and(char::is_whitespace)
        {
            cursor = after_name;
            continue;
        }

        let Some(tag_end) = lower[after_name..].find('>') else {
            break;
        };
        let body_start = after_name + tag_end + 1;
        let Some(body_len) = lower[body_start..].find(&close) else {
            break;
        };

        bodies.push(&html[body_start..body_start + body_len]);
        cursor = body_start + body_len + close.len();
    }

    bodies
}

/// Strip HTML tags from content (basic implementation)
fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut last_was_space = true;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
            }
            _ if !in_tag => {
                if c.is_whitespace() {
                    if !last_was_space {
                        result.push(' ');
                        last_was_space = true;
                    }
                } else {
                    result.push(c);
                    last_was_space = false;
                }
            }
            _ => {}
        }
    }

    // Decode common HTML entities
    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}
