//! Health-check proxy.
//!
//! Forwards probes to the workload's own health endpoint until the sidecar
//! starts draining, then answers `503 Service Unavailable` without touching
//! the backend so that load balancers take the instance out of rotation.
//!
//! Query parameters under the reserved `delth.` namespace are control knobs
//! for the sidecar and are never forwarded. `delth.ignoreShuttingDownState=1`
//! bypasses the draining short-circuit so operators can still probe the real
//! backend during a shutdown.

use crate::drain::DrainSwitch;
use clap::ValueEnum;
use futures::{TryStreamExt, future};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use url::{Url, form_urlencoded};

/// Reserved query parameter namespace.
pub const NAMESPACE: &str = "delth";

/// Query parameter that bypasses the draining short-circuit when set to `1`.
pub const IGNORE_DRAINING_PARAM: &str = "delth.ignoreShuttingDownState";

pub const DRAINING_BODY: &str = "delth: service is shutting down\n";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("creating backend request: {0}")]
    Request(String),

    #[error("performing HTTP request to backend: {0}")]
    BackendUnavailable(#[source] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Request(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn into_response(self) -> Response<ProxyBody> {
        error!(error = %self, "health check failed");
        let mut resp = Response::new(full(Bytes::new()));
        *resp.status_mut() = self.status();
        resp
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendScheme {
    #[default]
    Http,
    Https,
}

impl std::fmt::Display for BackendScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendScheme::Http => write!(f, "http"),
            BackendScheme::Https => write!(f, "https"),
        }
    }
}

/// Location of the workload's own health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub scheme: BackendScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BackendTarget {
    pub fn url(&self, query: Option<&str>) -> Result<Url, ProxyError> {
        let raw = format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path);
        let mut url = Url::parse(&raw).map_err(|e| ProxyError::Request(format!("{raw}: {e}")))?;
        url.set_query(query);
        Ok(url)
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// HTTP client settings for reaching the backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendClientOptions {
    pub timeout: Duration,
    pub tls_insecure_skip_verify: bool,
}

impl BackendClientOptions {
    pub fn build(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.tls_insecure_skip_verify)
            // The backend is local; never route it through an environment proxy.
            .no_proxy()
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct DrainableProxy {
    target: BackendTarget,
    drain: DrainSwitch,
    client: Client,
}

impl DrainableProxy {
    pub fn new(target: BackendTarget, drain: DrainSwitch, client: Client) -> Self {
        Self {
            target,
            drain,
            client,
        }
    }

    /// Builds the backend client from `options` and wraps it.
    pub fn build(
        target: BackendTarget,
        drain: DrainSwitch,
        options: &BackendClientOptions,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(target, drain, options.build()?))
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Starts failing health probes. Safe to call concurrently with requests.
    pub fn initiate_drain(&self) -> bool {
        self.drain.drain()
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_draining()
    }

    /// Handles one health probe. Never fails: errors become status codes.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Into<Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send + 'static,
    {
        match self.forward(req).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        }
    }

    async fn forward<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body + Send + 'static,
        B::Data: Into<Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send + 'static,
    {
        let (parts, body) = req.into_parts();
        let query = parts.uri.query();

        if !ignores_draining(query) && self.drain.is_draining() {
            debug!("responding service is shutting down");
            let mut resp = Response::new(full(Bytes::from_static(DRAINING_BODY.as_bytes())));
            *resp.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            resp.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            return Ok(resp);
        }

        let url = self.target.url(forwarded_query(query, NAMESPACE).as_deref())?;
        debug!(method = %parts.method, %url, "forwarding health check to backend");

        let mut outbound = self.client.request(parts.method, url);
        if !body.is_end_stream() {
            // Streamed as it arrives; nothing is buffered here.
            let frames = BodyStream::new(body).try_filter_map(|frame| {
                future::ready(Ok(frame.into_data().ok().map(Into::<Bytes>::into)))
            });
            outbound = outbound.body(reqwest::Body::wrap_stream(frames));
        }
        let outbound = outbound
            .build()
            .map_err(|e| ProxyError::Request(e.to_string()))?;

        let backend = self
            .client
            .execute(outbound)
            .await
            .map_err(ProxyError::BackendUnavailable)?;

        let status = backend.status();
        let mut resp = Response::builder().status(status);
        for (name, value) in backend.headers() {
            resp = resp.header(name, value);
        }

        debug!(http_status_code = status.as_u16(), "responding with backend response");

        let stream = backend.bytes_stream().map_ok(Frame::data).map_err(|e| {
            error!(error = %e, "copying backend response body to caller");
            Box::new(e) as BoxError
        });

        resp.body(StreamBody::new(stream).boxed_unsync())
            .map_err(|e| ProxyError::Request(e.to_string()))
    }
}

/// Whether the probe explicitly asked to see through the draining state.
fn ignores_draining(query: Option<&str>) -> bool {
    query
        .map(parse_query)
        .unwrap_or_default()
        .into_iter()
        .find(|(k, _)| k == IGNORE_DRAINING_PARAM)
        .is_some_and(|(_, v)| v == "1")
}

/// Drops every parameter under `namespace.` and keeps the rest untouched, in order.
///
/// Only keys are decoded, to recognise reserved names. Kept pairs are passed on
/// byte for byte so values the backend sees are exactly what the caller sent.
pub fn forwarded_query(raw: Option<&str>, namespace: &str) -> Option<String> {
    let reserved = format!("{namespace}.");
    let kept: Vec<&str> = raw?
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| !decoded_key(pair).starts_with(&reserved))
        .collect();

    if kept.is_empty() {
        return None;
    }
    Some(kept.join("&"))
}

fn decoded_key(pair: &str) -> String {
    let key = pair.split_once('=').map_or(pair, |(key, _)| key);
    form_urlencoded::parse(key.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(raw).unwrap_or_default()
}

pub(crate) fn full(bytes: Bytes) -> ProxyBody {
    Full::new(bytes)
        .map_err(|never| match never {})
        .boxed_unsync()
}
