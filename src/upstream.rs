//! Upstream Client — forwards admitted requests to the resolved route's
//! origin over a pooled HTTP/1.1 connection, enforcing a per-route deadline
//! spanning DNS, connect, TLS, request and response.
//!
//! Routes name however many distinct, dynamically-configured upstream hosts,
//! so this is built on a `hyper_util::client::legacy::Client` connection pool
//! keyed by authority rather than one fixed-host connection, with its own
//! hand-rolled rustls/webpki-roots TLS setup (see [`tls_connector`]).

#[cfg(feature = "tls")]
mod tls_connector;

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

const MAX_UPSTREAM_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
];

/// Gateway-internal headers that never belong on the outbound request: the
/// caller's own credential, and `Host`, which gets rewritten to the
/// upstream's authority instead.
const GATEWAY_ONLY_HEADERS: &[&str] = &["x-api-key", "host"];

pub enum Outcome {
    Ok {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Timeout,
    ConnectError(String),
    ProtocolError(String),
}

pub struct UpstreamClient {
    http: Client<HttpConnector, Full<Bytes>>,
    #[cfg(feature = "tls")]
    https: Client<tls_connector::HttpsConnector, Full<Bytes>>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(true);

        Self {
            http: Client::builder(TokioExecutor::new()).build(http_connector),
            #[cfg(feature = "tls")]
            https: Client::builder(TokioExecutor::new()).build(tls_connector::HttpsConnector::new()),
        }
    }

    /// Issues `method remaining_path_and_query` against `upstream_base_url`,
    /// carrying `headers` and `body` across with hop-by-hop and gateway-only
    /// headers stripped and `Host` rewritten, and enforces `timeout` across
    /// the whole attempt.
    pub async fn forward(
        &self,
        upstream_base_url: &str,
        remaining_path_and_query: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Outcome {
        let uri: Uri = match format!(
            "{}{}",
            upstream_base_url.trim_end_matches('/'),
            remaining_path_and_query
        )
        .parse()
        {
            Ok(uri) => uri,
            Err(e) => return Outcome::ProtocolError(format!("invalid upstream uri: {e}")),
        };

        let is_https = uri.scheme_str() == Some("https");
        let mut headers = headers;
        sanitize_headers(&mut headers, &uri);

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        let request = match builder.body(Full::new(body)) {
            Ok(r) => r,
            Err(e) => return Outcome::ProtocolError(e.to_string()),
        };

        enum AttemptError {
            Connect(String),
            Protocol(String),
        }

        // One deadline spans connect/request and response-body collection,
        // rather than a fresh `timeout_ms` budget for each phase.
        let attempt = async {
            let response = if is_https {
                #[cfg(feature = "tls")]
                {
                    self.https.request(request).await.map_err(|e| AttemptError::Connect(e.to_string()))?
                }
                #[cfg(not(feature = "tls"))]
                {
                    return Err(AttemptError::Connect("TLS support is not compiled into this build".to_string()));
                }
            } else {
                self.http.request(request).await.map_err(|e| AttemptError::Connect(e.to_string()))?
            };

            let (parts, incoming) = response.into_parts();
            let collected = incoming.collect().await.map_err(|e| AttemptError::Protocol(e.to_string()))?;
            let body = collected.to_bytes();
            if body.len() > MAX_UPSTREAM_BODY_BYTES {
                return Err(AttemptError::Protocol("upstream body too large".to_string()));
            }
            Ok((parts, body))
        };

        match tokio::time::timeout(timeout, attempt).await {
            Err(_) => Outcome::Timeout,
            Ok(Err(AttemptError::Connect(message))) => Outcome::ConnectError(message),
            Ok(Err(AttemptError::Protocol(message))) => Outcome::ProtocolError(message),
            Ok(Ok((parts, body))) => Outcome::Ok {
                status: parts.status.as_u16(),
                headers: parts
                    .headers
                    .iter()
                    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
                    .collect(),
                body: body.to_vec(),
            },
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_headers(headers: &mut HeaderMap, upstream_uri: &Uri) {
    for name in HOP_BY_HOP_HEADERS.iter().chain(GATEWAY_ONLY_HEADERS.iter()) {
        headers.remove(*name);
    }
    if let Some(host) = upstream_uri.host() {
        let host_value = match upstream_uri.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&host_value) {
            headers.insert(header::HOST, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_headers_strips_hop_by_hop_and_rewrites_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        headers.insert(header::HOST, HeaderValue::from_static("gateway.internal"));

        let uri: Uri = "https://origin.example.com:8443/widgets".parse().unwrap();
        sanitize_headers(&mut headers, &uri);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-api-key").is_none());
        assert_eq!(headers.get(header::HOST).unwrap(), "origin.example.com:8443");
    }
}
