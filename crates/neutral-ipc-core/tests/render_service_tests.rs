//! Integration tests for the render service over a real loopback socket.
//!
//! A counting stub renderer stands in for the template engine so the tests
//! can observe when the server renders and when it serves from cache.

use neutral_ipc::ipc::protocol::{self, HEADER_SIZE};
use neutral_ipc::{
    CacheStore, MemoryCache, RenderClient, RenderContext, RenderResult,
    RenderServer, RenderServerHandle, Renderer, RequestFrame, Schema, ServerConfig,
    SqliteCache, TemplateRef,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const MAX: usize = 1024 * 1024;

/// Renders `<template>|<GET.x>|<translated "Hello">`, counting calls.
/// Templates named `slow*` take a while; `missing*` do not exist.
#[derive(Default)]
struct CountingRenderer {
    calls: AtomicU32,
}

impl CountingRenderer {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Renderer for CountingRenderer {
    async fn render(
        &self,
        template: &TemplateRef,
        _schema_json: &str,
        context: &RenderContext,
    ) -> RenderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = template.as_str();
        if name.starts_with("missing") {
            return RenderResult::not_found(format!("template not found: {}", name));
        }
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let x = context
            .lookup_path("CONTEXT.GET.x")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        RenderResult::Success(format!("{}|{}|{}", name, x, context.translate("Hello")))
    }
}

async fn start_with(
    store: Arc<dyn CacheStore>,
    config: ServerConfig,
) -> (RenderServerHandle, Arc<CountingRenderer>) {
    let renderer = Arc::new(CountingRenderer::default());
    let handle = RenderServer::start(&config, renderer.clone(), store)
        .await
        .expect("server should start");
    (handle, renderer)
}

async fn start() -> (RenderServerHandle, Arc<CountingRenderer>) {
    start_with(Arc::new(MemoryCache::default()), local_config()).await
}

fn local_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        ..ServerConfig::default()
    }
}

fn get_schema(x: &str) -> Schema {
    Schema::from_value(json!({
        "config": {"cache_on_get": true},
        "data": {"CONTEXT": {"GET": {"x": x}}}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_cacheable_request_renders_once() {
    let (mut handle, renderer) = start().await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    let first = client
        .submit(TemplateRef::path("file.ntpl"), &get_schema("1"))
        .await
        .unwrap();
    let second = client
        .submit(TemplateRef::path("file.ntpl"), &get_schema("1"))
        .await
        .unwrap();

    assert_eq!(first.status_code, 200);
    assert_eq!(first.body, "file.ntpl|1|Hello");
    assert_eq!(first, second);
    assert_eq!(renderer.calls(), 1);

    handle.shutdown();
}

#[tokio::test]
async fn test_cache_shared_across_connections() {
    let (mut handle, renderer) = start().await;

    for _ in 0..3 {
        let client = RenderClient::connect(handle.addr()).await.unwrap();
        let response = client
            .submit(TemplateRef::path("file.ntpl"), &get_schema("7"))
            .await
            .unwrap();
        assert_eq!(response.body, "file.ntpl|7|Hello");
    }
    assert_eq!(renderer.calls(), 1);

    handle.shutdown();
}

#[tokio::test]
async fn test_different_query_is_a_different_entry() {
    let (mut handle, renderer) = start().await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    client.submit(TemplateRef::path("file.ntpl"), &get_schema("1")).await.unwrap();
    let other = client
        .submit(TemplateRef::path("file.ntpl"), &get_schema("2"))
        .await
        .unwrap();

    assert_eq!(other.body, "file.ntpl|2|Hello");
    assert_eq!(renderer.calls(), 2);

    handle.shutdown();
}

#[tokio::test]
async fn test_sqlite_store_serves_hits() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteCache::new(temp_dir.path().join("cache.db"), None).unwrap());
    let (mut handle, renderer) = start_with(store.clone(), local_config()).await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    for _ in 0..2 {
        client.submit(TemplateRef::path("file.ntpl"), &get_schema("1")).await.unwrap();
    }
    assert_eq!(renderer.calls(), 1);

    let entry = store
        .get(r#"neutral-cache|path:file.ntpl|GET={"x":"1"}"#)
        .unwrap()
        .expect("entry stored under the documented key");
    assert_eq!(entry.body, "file.ntpl|1|Hello");

    handle.shutdown();
}

#[tokio::test]
async fn test_missing_template_returns_error_status() {
    let (mut handle, _) = start().await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    let response = client
        .submit(TemplateRef::path("missing.ntpl"), &get_schema("1"))
        .await
        .unwrap();

    assert_ne!(response.status_code, 200);
    assert!(!response.status_param.is_empty());
    assert!(response.body.is_empty());

    // The connection survives a render failure.
    let ok = client
        .submit(TemplateRef::path("file.ntpl"), &Schema::default())
        .await
        .unwrap();
    assert_eq!(ok.status_code, 200);

    handle.shutdown();
}

#[tokio::test]
async fn test_invalid_schema_still_gets_a_response() {
    let (mut handle, renderer) = start().await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    let malformed = client
        .submit_json(TemplateRef::path("file.ntpl"), "{not json")
        .await
        .unwrap();
    assert_eq!(malformed.status_code, 400);
    assert!(malformed.status_param.contains("Malformed"));

    let bad_shape = client
        .submit_json(TemplateRef::path("file.ntpl"), r#"{"config": []}"#)
        .await
        .unwrap();
    assert_eq!(bad_shape.status_code, 400);
    assert!(bad_shape.status_param.contains("config"));

    assert_eq!(renderer.calls(), 0);

    handle.shutdown();
}

#[tokio::test]
async fn test_locale_fallback_through_server() {
    let (mut handle, _) = start().await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    let spanish = Schema::from_value(json!({
        "inherit": {"locale": {"current": "es", "trans": {"es": {"Hello": "Hola"}}}}
    }))
    .unwrap();
    let german = Schema::from_value(json!({
        "inherit": {"locale": {"current": "de", "trans": {"es": {"Hello": "Hola"}}}}
    }))
    .unwrap();

    let es = client.submit(TemplateRef::path("t.ntpl"), &spanish).await.unwrap();
    let de = client.submit(TemplateRef::path("t.ntpl"), &german).await.unwrap();
    assert!(es.body.ends_with("|Hola"));
    assert!(de.body.ends_with("|Hello"));

    handle.shutdown();
}

#[tokio::test]
async fn test_truncated_frame_closes_without_response() {
    let (mut handle, renderer) = start().await;

    let frame = RequestFrame::new(TemplateRef::path("file.ntpl"), &get_schema("1"));
    let bytes = protocol::encode_request(&frame).unwrap();

    let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
    stream.write_all(&bytes[..bytes.len() - 4]).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty(), "no response frame expected");
    assert_eq!(renderer.calls(), 0);

    handle.shutdown();
}

#[tokio::test]
async fn test_bad_control_byte_closes_without_response() {
    let (mut handle, _) = start().await;

    let frame = RequestFrame::new(TemplateRef::path("file.ntpl"), &Schema::default());
    let mut bytes = protocol::encode_request(&frame).unwrap().to_vec();
    bytes[1] = 77;

    let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
    stream.write_all(&bytes).await.unwrap();

    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    assert!(received.len() < HEADER_SIZE);

    handle.shutdown();
}

#[tokio::test]
async fn test_oversized_frame_closes_without_response() {
    let config = ServerConfig {
        port: 0,
        max_frame_size: 16,
        ..ServerConfig::default()
    };
    let (mut handle, renderer) = start_with(Arc::new(MemoryCache::default()), config).await;
    let client = RenderClient::connect(handle.addr()).await.unwrap();

    let result = client.submit(TemplateRef::path("file.ntpl"), &get_schema("1")).await;
    assert!(result.is_err());
    assert_eq!(renderer.calls(), 0);

    handle.shutdown();
}

#[tokio::test]
async fn test_slow_render_does_not_block_other_connections() {
    let (mut handle, _) = start().await;
    let addr = handle.addr();

    let slow = tokio::spawn(async move {
        let client = RenderClient::connect(addr).await.unwrap();
        client.submit(TemplateRef::path("slow.ntpl"), &Schema::default()).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = std::time::Instant::now();
    let client = RenderClient::connect(addr).await.unwrap();
    let fast = client
        .submit(TemplateRef::path("fast.ntpl"), &Schema::default())
        .await
        .unwrap();
    assert_eq!(fast.status_code, 200);
    assert!(started.elapsed() < Duration::from_millis(250));

    assert_eq!(slow.await.unwrap().unwrap().status_code, 200);

    handle.shutdown();
}

#[tokio::test]
async fn test_disconnect_mid_render_still_populates_cache() {
    let store = Arc::new(MemoryCache::default());
    let (mut handle, renderer) = start_with(store.clone(), local_config()).await;

    let frame = RequestFrame::new(TemplateRef::path("slow.ntpl"), &get_schema("9"));
    {
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        protocol::write_request(&mut stream, &frame).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    } // client gone before the render finishes

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(renderer.calls(), 1);
    assert!(store
        .get(r#"neutral-cache|path:slow.ntpl|GET={"x":"9"}"#)
        .unwrap()
        .is_some());

    let client = RenderClient::connect(handle.addr()).await.unwrap();
    let response = client.send(frame).await.unwrap();
    assert_eq!(response.body, "slow.ntpl|9|Hello");
    assert_eq!(renderer.calls(), 1);

    handle.shutdown();
}

#[tokio::test]
async fn test_queued_connection_waits_for_worker() {
    let config = ServerConfig {
        port: 0,
        max_workers: 1,
        max_queued: 4,
        ..ServerConfig::default()
    };
    let (mut handle, _) = start_with(Arc::new(MemoryCache::default()), config).await;
    let addr = handle.addr();

    let slow = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = RequestFrame::new(TemplateRef::path("slow.ntpl"), &Schema::default());
        protocol::write_request(&mut stream, &frame).await.unwrap();
        protocol::read_response(&mut stream, MAX).await.unwrap()
        // stream drops here, freeing the worker
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let client = RenderClient::connect(addr).await.unwrap();
    let queued = client
        .submit(TemplateRef::path("next.ntpl"), &Schema::default())
        .await
        .unwrap();

    assert_eq!(queued.status_code, 200);
    assert_eq!(slow.await.unwrap().status_code, 200);

    handle.shutdown();
}
