//! Localhost HTTP facade in front of the records server
//!
//! The UI talks to `127.0.0.1:<listen_port>` instead of the upstream
//! directly. While online, GET navigations pass through and refresh the
//! shell cache as a side effect. While offline, they are answered from
//! the cache, with the offline page as the last resort, so the shell
//! keeps loading without a connection. Non-GET requests are relayed
//! unmodified and fail fast with 503 when there is no link.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chartsync_core::config::FacadeConfig;
use chartsync_net::ConnectivityMonitor;

use crate::shell_cache::ShellCache;

/// Time allowed for one upstream request before falling back
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Local HTTP server that fronts the upstream records server
pub struct HttpFacade {
    listen_port: u16,
    upstream_url: String,
    cache: Arc<ShellCache>,
    monitor: Arc<ConnectivityMonitor>,
    client: reqwest::Client,
}

impl HttpFacade {
    pub fn new(
        config: &FacadeConfig,
        cache: Arc<ShellCache>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("Failed to build the facade HTTP client")?;

        Ok(Self {
            listen_port: config.listen_port,
            upstream_url: config.upstream_url.trim_end_matches('/').to_string(),
            cache,
            monitor,
            client,
        })
    }

    /// Populates the shell cache for the running application version
    pub async fn precache_shell(&self) -> Result<()> {
        self.cache.activate(&self.upstream_url, &self.client).await
    }

    /// Binds the facade to localhost and serves until shutdown
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.listen_port))
            .await
            .with_context(|| {
                format!("Failed to bind the facade to 127.0.0.1:{}", self.listen_port)
            })?;
        info!(port = self.listen_port, "Facade listening on localhost");
        self.serve(listener, shutdown).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let facade = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept a facade connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let facade = facade.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let facade = facade.clone();
                            async move { Ok::<_, hyper::Error>(facade.handle(req).await) }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(error = %e, "Facade connection ended with an error");
                        }
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("Facade shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.clone());

        if req.method() != Method::GET {
            if !self.monitor.is_online() {
                return respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    TEXT_PLAIN,
                    Bytes::from_static(b"upstream unreachable"),
                );
            }
            return self.relay(req).await;
        }

        if !self.monitor.is_online() {
            return self.serve_offline(&path, &path_and_query, true).await;
        }

        match self.fetch_upstream(&path_and_query).await {
            Ok((status, content_type, body)) => {
                if status.is_success() {
                    if let Err(e) = self.cache.store(&path, &content_type, &body).await {
                        debug!(path = %path, error = %e, "Could not refresh the shell cache");
                    }
                }
                respond(status, &content_type, body)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Upstream unreachable, serving from cache");
                self.serve_offline(&path, &path_and_query, false).await
            }
        }
    }

    /// Answers a GET without a usable upstream
    ///
    /// `try_network` allows one upstream attempt on a cache miss, since
    /// the connectivity monitor can lag the real link state.
    async fn serve_offline(
        &self,
        path: &str,
        path_and_query: &str,
        try_network: bool,
    ) -> Response<Full<Bytes>> {
        if let Some(cached) = self.cache.lookup(path).await {
            debug!(path, "Served from shell cache");
            return respond(
                StatusCode::OK,
                &cached.content_type,
                Bytes::from(cached.body),
            );
        }

        if try_network {
            if let Ok((status, content_type, body)) = self.fetch_upstream(path_and_query).await {
                return respond(status, &content_type, body);
            }
        }

        debug!(path, "Serving the offline page");
        let page = self.cache.offline_page().await;
        respond(StatusCode::OK, &page.content_type, Bytes::from(page.body))
    }

    async fn fetch_upstream(&self, path_and_query: &str) -> Result<(StatusCode, String, Bytes)> {
        let url = format!("{}{}", self.upstream_url, path_and_query);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/html; charset=utf-8")
            .to_string();
        let body = response.bytes().await?;
        Ok((status, content_type, body))
    }

    /// Forwards a non-GET request to the upstream as-is
    async fn relay(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let collected = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to read a relayed request body");
                return respond(
                    StatusCode::BAD_REQUEST,
                    TEXT_PLAIN,
                    Bytes::from_static(b"unreadable request body"),
                );
            }
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.upstream_url, path_and_query);

        let mut upstream = self.client.request(parts.method.clone(), &url);
        for name in [header::CONTENT_TYPE, header::AUTHORIZATION] {
            if let Some(value) = parts.headers.get(&name) {
                upstream = upstream.header(name.clone(), value.clone());
            }
        }

        match upstream.body(collected).send().await {
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match response.bytes().await {
                    Ok(body) => respond(status, &content_type, body),
                    Err(e) => {
                        warn!(error = %e, "Failed to read a relayed response body");
                        respond(
                            StatusCode::BAD_GATEWAY,
                            TEXT_PLAIN,
                            Bytes::from_static(b"upstream body unreadable"),
                        )
                    }
                }
            }
            Err(e) => {
                warn!(method = %parts.method, path = path_and_query, error = %e, "Relay to upstream failed");
                respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    TEXT_PLAIN,
                    Bytes::from_static(b"upstream unreachable"),
                )
            }
        }
    }
}

/// Builds a response, tolerating content types that are not valid header
/// values
fn respond(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    let value = header::HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, value);
    response
}

// ============================================================================
// Tests
// ============================================================================
