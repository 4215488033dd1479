//! HTTP listener serving the health-check proxy.

use crate::proxy::{DrainableProxy, ProxyBody, full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ListenerShutdownError {
    #[error("in-flight requests still running after {0:?}")]
    Timeout(Duration),

    #[error("listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Address to listen on, in `host:port` form.
///
/// An empty host (`:8069`) listens on every interface, IPv6 included.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ListenAddress(String);

impl Default for ListenAddress {
    fn default() -> Self {
        ListenAddress("[::]:8069".to_string())
    }
}

impl FromStr for ListenAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("listen address `{s}` must be host:port"))?;
        port.parse::<u16>()
            .map_err(|e| format!("invalid port in listen address `{s}`: {e}"))?;
        let host = if host.is_empty() { "[::]" } else { host };
        Ok(ListenAddress(format!("{host}:{port}")))
    }
}

impl TryFrom<String> for ListenAddress {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ListenAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IPv4 wildcard with the same port, for hosts where IPv6 is disabled.
    fn ipv4_fallback(&self) -> Option<String> {
        self.0
            .strip_prefix("[::]:")
            .map(|port| format!("0.0.0.0:{port}"))
    }
}

/// Routes the single health path to the proxy; everything else is 404.
#[derive(Clone)]
struct HealthService {
    route: Arc<str>,
    proxy: Arc<DrainableProxy>,
}

impl Service<Request<Incoming>> for HealthService {
    type Response = Response<ProxyBody>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move {
            if req.uri().path() != &*svc.route {
                debug!(path = req.uri().path(), "no route");
                let mut not_found = Response::new(full(Bytes::new()));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                return Ok(not_found);
            }
            Ok(svc.proxy.handle(req).await)
        })
    }
}

pub struct HealthServer {
    listener: TcpListener,
    route: String,
}

impl HealthServer {
    pub async fn bind(addr: &ListenAddress, route: impl Into<String>) -> std::io::Result<Self> {
        // `[::]` is dual-stack on Linux and also accepts IPv4 clients.
        let listener = match (TcpListener::bind(addr.as_str()).await, addr.ipv4_fallback()) {
            (Ok(listener), _) => listener,
            (Err(e), Some(fallback)) if e.kind() != std::io::ErrorKind::AddrInUse => {
                debug!(error = %e, %fallback, "IPv6 unavailable, listening on IPv4 only");
                TcpListener::bind(fallback).await?
            }
            (Err(e), _) => return Err(e),
        };
        Ok(Self {
            listener,
            route: route.into(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts serving in the background.
    pub fn spawn(self, proxy: DrainableProxy) -> ServerHandle {
        let stop = CancellationToken::new();
        let service = HealthService {
            route: self.route.into(),
            proxy: Arc::new(proxy),
        };
        let listener = self.listener;

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, route = &*service.route, "health-check proxy listening");
        }

        let token = stop.clone();
        let task = tokio::spawn(async move {
            let graceful = GracefulShutdown::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            let conn = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service.clone());
                            let conn = graceful.watch(conn);
                            tokio::spawn(async move {
                                if let Err(err) = conn.await {
                                    error!("error serving connection: {:?}", err);
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "accept error"),
                    },
                    _ = token.cancelled() => break,
                }
            }
            // Stop accepting right away; in-flight connections are tracked by `graceful`.
            drop(listener);
            graceful
        });

        ServerHandle { stop, task }
    }
}

pub struct ServerHandle {
    stop: CancellationToken,
    task: JoinHandle<GracefulShutdown>,
}

impl ServerHandle {
    /// Stops accepting connections and waits up to `timeout` for in-flight ones to finish.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ListenerShutdownError> {
        self.stop.cancel();
        let graceful = self.task.await?;
        tokio::time::timeout(timeout, graceful.shutdown())
            .await
            .map_err(|_| ListenerShutdownError::Timeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DrainSwitch;
    use crate::proxy::BackendClientOptions;
    use crate::testing::{StubBackend, StubReply};

    fn proxy_for(backend: &StubBackend) -> DrainableProxy {
        let client = BackendClientOptions {
            timeout: Duration::from_secs(10),
            tls_insecure_skip_verify: false,
        }
        .build()
        .unwrap();
        DrainableProxy::new(backend.target("/healthz"), DrainSwitch::new(), client)
    }

    fn loopback() -> ListenAddress {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn listen_address_parsing() {
        assert_eq!(
            ":8069".parse::<ListenAddress>().unwrap().as_str(),
            "[::]:8069"
        );
        assert_eq!(ListenAddress::default().as_str(), "[::]:8069");
        assert_eq!(
            ":8069".parse::<ListenAddress>().unwrap().ipv4_fallback().as_deref(),
            Some("0.0.0.0:8069")
        );
        assert_eq!(
            "127.0.0.1:80".parse::<ListenAddress>().unwrap().ipv4_fallback(),
            None
        );
        assert_eq!(
            "127.0.0.1:80".parse::<ListenAddress>().unwrap().as_str(),
            "127.0.0.1:80"
        );
        assert_eq!(
            "[::1]:80".parse::<ListenAddress>().unwrap().as_str(),
            "[::1]:80"
        );
        assert!("8069".parse::<ListenAddress>().is_err());
        assert!(":http".parse::<ListenAddress>().is_err());
    }

    #[tokio::test]
    async fn serves_only_the_health_route() {
        let backend = StubBackend::spawn(StubReply::default()).await;
        let server = HealthServer::bind(&loopback(), "/health").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn(proxy_for(&backend));

        let ok = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = reqwest::get(format!("http://{addr}/other")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(backend.hits(), 1);

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn empty_host_accepts_ipv4_clients() {
        let backend = StubBackend::spawn(StubReply::default()).await;
        let server = HealthServer::bind(&":0".parse().unwrap(), "/health")
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = server.spawn(proxy_for(&backend));

        let ok = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let backend = StubBackend::spawn(StubReply::default()).await;
        let server = HealthServer::bind(&loopback(), "/health").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn(proxy_for(&backend));

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_request() {
        let backend = StubBackend::spawn(StubReply {
            delay: Duration::from_millis(300),
            ..Default::default()
        })
        .await;
        let server = HealthServer::bind(&loopback(), "/health").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn(proxy_for(&backend));

        let in_flight = tokio::spawn(reqwest::get(format!("http://{addr}/health")));
        backend.received().await;

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        let resp = in_flight.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_timeout() {
        let backend = StubBackend::spawn(StubReply {
            delay: Duration::from_secs(5),
            ..Default::default()
        })
        .await;
        let server = HealthServer::bind(&loopback(), "/health").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn(proxy_for(&backend));

        let _in_flight = tokio::spawn(reqwest::get(format!("http://{addr}/health")));
        backend.received().await;

        let started = std::time::Instant::now();
        let err = handle
            .shutdown(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerShutdownError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
