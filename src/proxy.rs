//! Passthrough of authenticated requests to the target host.

use axum::body::{self, Body, Bytes};
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use reqwest::redirect;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::GatewayConfig;
use crate::destination::Destination;
use crate::session::SESSION_COOKIE;

/// Request bodies are buffered so they can be replayed across redirects.
pub(crate) const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("destination has no port")]
    MissingPort,
    #[error("port {0} is out of range")]
    InvalidPort(i64),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid host header: {0}")]
    InvalidHost(#[from] InvalidHeaderValue),
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct Passthrough {
    config: Arc<GatewayConfig>,
    client: reqwest::Client,
}

impl Passthrough {
    /// The client itself never follows redirects; [`Passthrough::forward`]
    /// walks them so every hop gets its own `Host` header.
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.upstream_timeout)
            .no_proxy()
            .build()?;

        Ok(Self { config, client })
    }

    /// Sends `request` to `http://<target>:<port><resource path>` and hands
    /// back the upstream status, headers and body untouched.
    ///
    /// Up to `max_redirects` redirects are followed; needing one more is
    /// [`ProxyError::TooManyRedirects`].
    pub async fn forward(
        &self,
        request: Request,
        destination: &Destination,
    ) -> Result<Response, ProxyError> {
        let port = destination.port.ok_or(ProxyError::MissingPort)?;
        let port = u16::try_from(port).map_err(|_| ProxyError::InvalidPort(port))?;

        let (parts, request_body) = request.into_parts();
        let mut url = Url::parse(&self.config.target_url(
            port,
            &destination.resource_path,
            parts.uri.query(),
        ))?;
        let mut method = parts.method;
        let mut headers = parts.headers;
        strip_session_cookie(&mut headers);

        let mut request_body = body::to_bytes(request_body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(ProxyError::RequestBody)?;

        let mut redirects = 0;
        loop {
            headers.insert(header::HOST, HeaderValue::from_str(&authority(&url))?);

            tracing::debug!(%url, %method, "forwarding request");
            let upstream = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(request_body.clone())
                .send()
                .await?;

            let Some(next) = redirect_target(&url, &upstream) else {
                return Ok(relay(upstream));
            };
            if redirects == self.config.max_redirects {
                return Err(ProxyError::TooManyRedirects(self.config.max_redirects));
            }
            redirects += 1;

            if switches_to_get(upstream.status(), &method) {
                method = Method::GET;
                request_body = Bytes::new();
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::CONTENT_TYPE);
                headers.remove(header::TRANSFER_ENCODING);
            }
            if authority(&next) != authority(&url) {
                headers.remove(header::AUTHORIZATION);
                headers.remove(header::COOKIE);
                headers.remove(header::PROXY_AUTHORIZATION);
            }
            url = next;
        }
    }
}

fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// `host:port` with the port always spelled out, e.g. `localhost:80`.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Where a redirect response points, if it is one the proxy follows.
fn redirect_target(current: &Url, upstream: &reqwest::Response) -> Option<Url> {
    if !matches!(
        upstream.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }

    let location = upstream.headers().get(header::LOCATION)?.to_str().ok()?;
    let next = current.join(location).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}

fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        _ => false,
    }
}

/// Keeps the gateway's own session cookie away from proxied services.
fn strip_session_cookie(headers: &mut HeaderMap) {
    let kept: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            !pair.is_empty() && name.trim() != SESSION_COOKIE
        })
        .map(str::to_string)
        .collect();

    headers.remove(header::COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(header::COOKIE, value);
    }
}
