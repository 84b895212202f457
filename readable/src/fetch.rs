use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

/// Upstream statuses that are worth another try later.
const RETRYABLE_HTTP_STATUSES: [u16; 6] = [429, 500, 501, 502, 503, 504];

/// Hard cap on stored error details.
const DETAIL_CLIP_CHARS: usize = 180;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FetchConfig {
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 5,
            read_timeout_seconds: 20,
            max_bytes: 2_000_000,
            user_agent: "NudgeBot/0.1".to_string(),
        }
    }
}

/// Outcome of one fetch. Failures are data, not `Err`: every way a fetch can
/// go wrong maps to an `error_code` plus a retryable flag, and the caller
/// records the whole thing as an attempt.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub ok: bool,
    pub final_url: Option<String>,
    pub http_status: Option<i32>,
    pub content_type: Option<String>,
    pub body_bytes: Option<Vec<u8>>,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub retryable: bool,
}

impl FetchResult {
    fn success(final_url: String, http_status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            ok: true,
            final_url: Some(final_url),
            http_status: Some(i32::from(http_status)),
            content_type,
            body_bytes: Some(body),
            error_code: None,
            error_detail: None,
            retryable: false,
        }
    }

    fn failure(code: impl Into<String>, detail: impl AsRef<str>, retryable: bool) -> Self {
        Self {
            ok: false,
            final_url: None,
            http_status: None,
            content_type: None,
            body_bytes: None,
            error_code: Some(code.into()),
            error_detail: Some(short_detail(detail.as_ref())),
            retryable,
        }
    }

    fn failure_with_response(
        mut self,
        final_url: String,
        http_status: u16,
        content_type: Option<String>,
    ) -> Self {
        self.final_url = Some(final_url);
        self.http_status = Some(i32::from(http_status));
        self.content_type = content_type;
        self
    }
}

/// Clip a message so attempt rows stay bounded.
pub fn short_detail(msg: &str) -> String {
    let msg = msg.trim();
    if msg.chars().count() <= DETAIL_CLIP_CHARS {
        return msg.to_string();
    }
    let clipped: String = msg.chars().take(DETAIL_CLIP_CHARS - 3).collect();
    format!("{clipped}...")
}

fn is_probably_invalid_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw) else {
        return true;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return true;
    }
    parsed.host_str().is_none_or(str::is_empty)
}

enum StatusClass {
    Ok,
    RetryableHttp,
    Timeout,
    TerminalHttp,
}

fn classify_status(status: u16) -> StatusClass {
    if RETRYABLE_HTTP_STATUSES.contains(&status) {
        StatusClass::RetryableHttp
    } else if status == 408 {
        StatusClass::Timeout
    } else if (400..500).contains(&status) {
        StatusClass::TerminalHttp
    } else {
        StatusClass::Ok
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("text/html") || lowered.contains("application/xhtml+xml")
}

fn transport_failure(err: &reqwest::Error) -> FetchResult {
    if err.is_timeout() {
        FetchResult::failure("timeout", err.to_string(), true)
    } else if err.is_builder() {
        FetchResult::failure("unexpected_fetch_error", err.to_string(), false)
    } else {
        // DNS, refused connections, TLS handshakes, aborted bodies.
        FetchResult::failure("connection_error", err.to_string(), true)
    }
}

/// The seam between the worker and the network. The production implementation
/// is [`HttpFetcher`]; tests substitute deterministic stubs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        if is_probably_invalid_url(url) {
            return FetchResult::failure(
                "invalid_url",
                "URL appears invalid. Please double-check it.",
                false,
            );
        }

        let mut response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(&err),
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        match classify_status(status.as_u16()) {
            StatusClass::RetryableHttp => {
                return FetchResult::failure(
                    format!("http_{}", status.as_u16()),
                    format!("Upstream returned HTTP {}.", status.as_u16()),
                    true,
                )
                .failure_with_response(final_url, status.as_u16(), content_type);
            }
            StatusClass::Timeout => {
                return FetchResult::failure("timeout", "Request timed out (HTTP 408).", true)
                    .failure_with_response(final_url, status.as_u16(), content_type);
            }
            StatusClass::TerminalHttp => {
                return FetchResult::failure(
                    format!("http_{}", status.as_u16()),
                    format!("Upstream returned HTTP {}.", status.as_u16()),
                    false,
                )
                .failure_with_response(final_url, status.as_u16(), content_type);
            }
            StatusClass::Ok => {}
        }

        if let Some(content_type) = &content_type {
            if !is_html_content_type(content_type) {
                return FetchResult::failure(
                    "non_html",
                    "Link does not look like an HTML page (non-HTML content type).",
                    false,
                )
                .failure_with_response(final_url, status.as_u16(), Some(content_type.clone()));
            }
        }

        // Stream the body so the cap aborts the transfer instead of merely
        // discarding an oversized buffer afterwards. Dropping the response
        // closes the connection.
        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() > self.max_bytes {
                        debug!("fetch of {final_url} exceeded {} bytes", self.max_bytes);
                        return FetchResult::failure(
                            "max_bytes_exceeded",
                            "Page is too large to process.",
                            false,
                        )
                        .failure_with_response(final_url, status.as_u16(), content_type);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    return transport_failure(&err).failure_with_response(
                        final_url,
                        status.as_u16(),
                        content_type,
                    );
                }
            }
        }

        FetchResult::success(final_url, status.as_u16(), content_type, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_detail_passes_short_messages_through() {
        assert_eq!(short_detail("  plain failure  "), "plain failure");
    }

    #[test]
    fn short_detail_clips_long_messages() {
        let long = "x".repeat(500);
        let clipped = short_detail(&long);
        assert_eq!(clipped.chars().count(), DETAIL_CLIP_CHARS);
        assert!(clipped.ends_with("..."));
    }

    #[test]
    fn short_detail_clips_on_char_boundaries() {
        let long = "é".repeat(400);
        let clipped = short_detail(&long);
        assert_eq!(clipped.chars().count(), DETAIL_CLIP_CHARS);
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(is_probably_invalid_url("ftp://example.com/file"));
        assert!(is_probably_invalid_url("javascript:alert(1)"));
        assert!(is_probably_invalid_url("not a url at all"));
    }

    #[test]
    fn rejects_empty_hosts() {
        assert!(is_probably_invalid_url("http:///path-only"));
    }

    #[test]
    fn accepts_ordinary_urls() {
        assert!(!is_probably_invalid_url("https://example.com/article"));
        assert!(!is_probably_invalid_url("http://example.com"));
    }

    #[test]
    fn retryable_statuses_classify_as_retryable() {
        for status in [429, 500, 501, 502, 503, 504] {
            assert!(matches!(classify_status(status), StatusClass::RetryableHttp));
        }
    }

    #[test]
    fn http_408_classifies_as_timeout() {
        assert!(matches!(classify_status(408), StatusClass::Timeout));
    }

    #[test]
    fn other_4xx_classify_as_terminal() {
        for status in [400, 401, 403, 404, 410, 451] {
            assert!(matches!(classify_status(status), StatusClass::TerminalHttp));
        }
    }

    #[test]
    fn success_statuses_classify_as_ok() {
        assert!(matches!(classify_status(200), StatusClass::Ok));
        assert!(matches!(classify_status(204), StatusClass::Ok));
    }

    #[test]
    fn html_content_types_are_recognized() {
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(is_html_content_type("Text/HTML"));
        assert!(!is_html_content_type("application/pdf"));
        assert!(!is_html_content_type("image/png"));
    }
}
