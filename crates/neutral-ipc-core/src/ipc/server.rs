//! TCP render server.
//!
//! Accepts client connections, decodes render requests, merges their
//! schema, consults the cache and calls the renderer.
//!
//! # Connection lifecycle
//!
//! `Listening -> ReadingRequest -> Merging -> CacheLookup ->
//! {Rendering | Serving} -> WritingResponse -> {Listening | Closed}`.
//! Schema and render problems become a response with a non-200 status.
//! Framing problems close the connection without a response.
//!
//! # Backpressure
//!
//! At most `max_workers` connections are served at once. Up to
//! `max_queued` more wait for a worker slot; anything past that is refused
//! at accept time. A connection keeps its worker between requests, so an
//! idle keep-alive client holds a slot until `read_timeout` closes it.

use super::protocol::{read_request, write_response, RenderResponse, RequestFrame};
use crate::cache::{self, CacheEntry, CacheStore, CacheVerdict};
use crate::config::ServerConfig;
use crate::error::NeutralError;
use crate::render::{RenderResult, Renderer};
use crate::schema::Schema;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Semaphore};
use tracing::{debug, error, info, warn};

/// Handle to a running render server. Dropping shuts down the server.
pub struct RenderServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RenderServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals connection handlers to
    /// close once they are back to waiting for a request.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for RenderServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Per-request pipeline: merge, cache lookup, render, store.
pub struct Orchestrator<R: Renderer> {
    renderer: Arc<R>,
    store: Arc<dyn CacheStore>,
}

impl<R: Renderer> Clone for Orchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            renderer: self.renderer.clone(),
            store: self.store.clone(),
        }
    }
}

impl<R: Renderer> Orchestrator<R> {
    pub fn new(renderer: Arc<R>, store: Arc<dyn CacheStore>) -> Self {
        Self { renderer, store }
    }

    /// Turn one decoded request into a response. Never fails: every
    /// problem past the framing layer is reported through the status.
    pub async fn process(&self, frame: &RequestFrame) -> RenderResponse {
        let parsed = frame
            .schema_text()
            .and_then(|text| Ok((text, Schema::parse_str(text)?)));
        let (schema_json, schema) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Rejecting request for {}: {}", frame.template, e);
                let err = NeutralError::from(e);
                return RenderResponse::error(err.to_status_code(), "Bad Request", err.to_string());
            }
        };

        let context = schema.merge();
        let verdict = cache::evaluate(&schema.config, &frame.template, schema.context());

        if let CacheVerdict::Cacheable(key) = &verdict {
            match self.cache_get(key).await {
                Ok(Some(entry)) => {
                    debug!("Cache hit for {}", key);
                    return RenderResponse::ok(entry.body);
                }
                Ok(None) => debug!("Cache miss for {}", key),
                Err(e) => warn!("Cache lookup failed for {}: {}", key, e),
            }
        }

        match self.renderer.render(&frame.template, schema_json, &context).await {
            RenderResult::Success(body) => {
                if let Some(key) = verdict.key() {
                    if let Err(e) = self.cache_put(key, &body).await {
                        warn!("Not caching {} ({} store): {}", key, self.store.name(), e);
                    }
                }
                RenderResponse::ok(body)
            }
            RenderResult::Failure { code, text, detail } => {
                let code = if code < 300 { 500 } else { code };
                let param = if detail.is_empty() {
                    frame.template.to_string()
                } else {
                    detail
                };
                debug!("Render of {} failed: {} {} ({})", frame.template, code, text, param);
                RenderResponse::error(code, text, param)
            }
        }
    }

    // Stores are synchronous and may touch disk, so they run on the
    // blocking pool.
    async fn cache_get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let store = self.store.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| NeutralError::Cache {
                message: format!("lookup task failed: {}", e),
            })?
    }

    async fn cache_put(&self, key: &str, body: &str) -> Result<()> {
        let store = self.store.clone();
        let key = key.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || store.put(&key, &body))
            .await
            .map_err(|e| NeutralError::Cache {
                message: format!("store task failed: {}", e),
            })?
    }
}

/// Connection limits taken from `ServerConfig`.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_workers: usize,
    max_queued: usize,
    max_frame_size: usize,
    read_timeout: Duration,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            max_queued: config.max_queued,
            max_frame_size: config.max_frame_size,
            read_timeout: config.read_timeout(),
        }
    }
}

/// Releases an admission slot when the connection task ends.
struct Admission(Arc<AtomicUsize>);

impl Drop for Admission {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Render server listening for client connections.
pub struct RenderServer;

impl RenderServer {
    /// Bind to `config.host:config.port` and start serving.
    ///
    /// The server runs in background tokio tasks until the handle is shut
    /// down or dropped.
    pub async fn start<R: Renderer>(
        config: &ServerConfig,
        renderer: Arc<R>,
        store: Arc<dyn CacheStore>,
    ) -> Result<RenderServerHandle> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!(
            "Neutral IPC listening on {} ({} workers, {} cache)",
            addr,
            config.max_workers,
            store.name()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Orchestrator::new(renderer, store),
            Limits::from(config),
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(RenderServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<R: Renderer>(
        listener: TcpListener,
        orchestrator: Orchestrator<R>,
        limits: Limits,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let workers = Arc::new(Semaphore::new(limits.max_workers));
        let admitted = Arc::new(AtomicUsize::new(0));
        let capacity = limits.max_workers + limits.max_queued;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Neutral IPC server shutting down");
                    workers.close();
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = admitted.load(Ordering::Relaxed);
                            if current >= capacity {
                                warn!(
                                    "Refusing connection from {}: {} workers busy and queue full",
                                    peer_addr,
                                    limits.max_workers
                                );
                                drop(stream);
                                continue;
                            }

                            admitted.fetch_add(1, Ordering::Relaxed);
                            let admission = Admission(admitted.clone());
                            let workers = workers.clone();
                            let orchestrator = orchestrator.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                let _admission = admission;
                                let permit = tokio::select! {
                                    permit = workers.acquire_owned() => match permit {
                                        Ok(permit) => permit,
                                        Err(_) => return,
                                    },
                                    _ = conn_shutdown.changed() => return,
                                };

                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    &orchestrator,
                                    limits,
                                    &mut conn_shutdown,
                                )
                                .await
                                {
                                    debug!("Connection {} closed: {}", peer_addr, e);
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<R: Renderer>(
        mut stream: TcpStream,
        orchestrator: &Orchestrator<R>,
        limits: Limits,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        loop {
            let frame = tokio::select! {
                result = tokio::time::timeout(
                    limits.read_timeout,
                    read_request(&mut reader, limits.max_frame_size),
                ) => {
                    match result {
                        Ok(Ok(Some(frame))) => frame,
                        Ok(Ok(None)) => return Ok(()), // Clean disconnect
                        Ok(Err(e)) => {
                            if matches!(e, NeutralError::Codec(_)) {
                                warn!("Dropping connection on framing error: {}", e);
                            }
                            return Err(e);
                        }
                        Err(_) => return Err(NeutralError::Timeout(limits.read_timeout)),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            // Not raced against anything: a render that has started always
            // finishes, even if the peer is gone by the time we write.
            let response = orchestrator.process(&frame).await;

            write_response(&mut writer, &response).await?;
        }
    }
}
