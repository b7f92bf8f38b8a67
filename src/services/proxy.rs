//! Reverse-proxy fallback for paths that do not name one of our objects.
//!
//! Requests are forwarded to a fixed origin site. HTML pages coming back have
//! their absolute links to the origin rewritten to root-relative ones, so that
//! browsing stays on this server and keeps flowing through the fallback.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, header},
    response::Response,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no proxy origin configured")]
    NotConfigured,
    #[error("proxying to `{url}` failed: {reason}")]
    FallbackFailed { url: String, reason: String },
}

/// A request handed to the fallback: the path (with query) relative to the origin.
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub target_path: String,
    pub headers: HeaderMap,
}

#[async_trait]
pub trait ProxyFallback: Send + Sync {
    /// Produce a ready-to-send response for `request`.
    ///
    /// # Errors
    /// - `ProxyError::NotConfigured` when there is no origin to forward to
    /// - `ProxyError::FallbackFailed` when the origin cannot be reached or read
    async fn proxy(&self, request: ProxyRequest) -> Result<Response, ProxyError>;
}

const SKIPPED_REQUEST_HEADERS: [&str; 6] = [
    "host",
    "connection",
    "accept-encoding",
    "content-length",
    "transfer-encoding",
    "range",
];

const SKIPPED_RESPONSE_HEADERS: [&str; 5] = [
    "connection",
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "set-cookie",
];

/// Fallback that fetches from an origin site with `reqwest`.
pub struct HttpProxy {
    client: reqwest::Client,
    origin: Option<url::Url>,
}

impl HttpProxy {
    pub fn new(origin: Option<&str>) -> anyhow::Result<Self> {
        let origin = origin.map(url::Url::parse).transpose()?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, origin })
    }

    fn target_url(&self, target_path: &str) -> Result<url::Url, ProxyError> {
        let origin = self.origin.as_ref().ok_or(ProxyError::NotConfigured)?;
        origin
            .join(target_path.trim_start_matches('/'))
            .map_err(|e| ProxyError::FallbackFailed {
                url: format!("{origin}{target_path}"),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ProxyFallback for HttpProxy {
    async fn proxy(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
        let url = self.target_url(&request.target_path)?;
        info!(method = %request.method, %url, "proxying request to origin");

        let failed = |reason: String| ProxyError::FallbackFailed {
            url: url.to_string(),
            reason,
        };

        let mut outgoing = self.client.request(request.method.clone(), url.clone());
        for (name, value) in &request.headers {
            if SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
                continue;
            }
            outgoing = outgoing.header(name, value);
        }

        let upstream = outgoing.send().await.map_err(|e| failed(e.to_string()))?;
        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(|e| failed(e.to_string()))?;

        let is_html = upstream_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));

        let body = if is_html && status.is_success() {
            let html = String::from_utf8_lossy(&body);
            debug!(%url, "rewriting origin links");
            Body::from(rewrite_links(&html, &url))
        } else {
            Body::from(body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in &upstream_headers {
            if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name, value.clone());
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("*"),
        );

        if request.method == Method::HEAD {
            *response.body_mut() = Body::empty();
        }
        Ok(response)
    }
}

/// Rewrite absolute links pointing at the origin host into root-relative links.
pub fn rewrite_links(html: &str, page_url: &url::Url) -> String {
    let Some(host) = page_url.host_str() else {
        return html.to_string();
    };
    let authority = match page_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut rewritten = html.to_string();
    for prefix in [
        format!("https://{authority}/"),
        format!("http://{authority}/"),
        format!("//{authority}/"),
    ] {
        rewritten = rewritten.replace(&prefix, "/");
    }
    rewritten
}

#[cfg(test)]
pub mod mock {
    //! Fallback double that records what it was asked to proxy.

    use super::*;
    use axum::http::StatusCode;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingProxy {
        calls: Mutex<Vec<ProxyRequest>>,
        fail: bool,
    }

    impl RecordingProxy {
        pub fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .map(|r| r.target_path.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ProxyFallback for RecordingProxy {
        async fn proxy(&self, request: ProxyRequest) -> Result<Response, ProxyError> {
            let target = request.target_path.clone();
            self.calls.lock().push(request);
            if self.fail {
                return Err(ProxyError::FallbackFailed {
                    url: target,
                    reason: "origin unreachable".into(),
                });
            }
            let mut response = Response::new(Body::from(format!("proxied:{target}")));
            *response.status_mut() = StatusCode::OK;
            Ok(response)
        }
    }
}
