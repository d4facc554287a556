//! Neutral IPC - a shared template-rendering service for local clients.
//!
//! A long-lived server owns one template engine. Client processes in any
//! language send a template reference plus a three-layer schema (`config`,
//! `inherit`, `data`) and get back the rendered body with a status triple.
//!
//! This crate holds the contract between the two sides: the wire codec,
//! schema validation and merge, cache eligibility, and the orchestrating
//! server loop. The engine itself plugs in through [`Renderer`].
//!
//! # Example
//!
//! ```rust,ignore
//! use neutral_ipc::{RenderClient, TemplateRef};
//!
//! #[tokio::main]
//! async fn main() -> neutral_ipc::Result<()> {
//!     let client = RenderClient::connect("127.0.0.1:4273".parse().unwrap()).await?;
//!     let response = client
//!         .submit_json(TemplateRef::path("index.ntpl"), r#"{"data": {"title": "Hi"}}"#)
//!         .await?;
//!     println!("{} {}", response.status_code, response.body);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod ipc;
pub mod render;
pub mod schema;

pub use cache::{open_store, CacheEntry, CacheStore, CacheVerdict, MemoryCache, NoCache, SqliteCache};
pub use config::{CacheBackendKind, CacheSettings, IpcConfig, ServerConfig};
pub use error::{CodecError, NeutralError, Result, SchemaError};
pub use ipc::{Orchestrator, RenderClient, RenderResponse, RenderServer, RenderServerHandle, RequestFrame};
pub use render::{RenderFlags, RenderResult, Renderer, TemplateRef};
pub use schema::{RenderContext, RequestContext, Schema, Translations};
