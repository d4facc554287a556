//! Local IPC between render clients and the render server.
//!
//! Neutral IPC records over `127.0.0.1` TCP connections.
//!
//! # Architecture
//!
//! - **Protocol**: record framing shared by both sides
//! - **Server**: accepts connections and runs each request through the
//!   `Orchestrator` (merge, cache, render)
//! - **Client**: submits requests and reads back the status and body

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RenderClient;
pub use protocol::{RenderResponse, RequestFrame};
pub use server::{Orchestrator, RenderServer, RenderServerHandle};
