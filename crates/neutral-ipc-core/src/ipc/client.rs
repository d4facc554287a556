//! TCP client for a render server.
//!
//! One capability: `submit(template, schema)` returns the rendered body and
//! status triple. The connection is reused across calls.
//!
//! # Thread Safety
//!
//! The client uses a tokio `Mutex` to serialize access to the TCP stream,
//! so one request's response is read before the next request is written.

use super::protocol::{read_response, write_request, RenderResponse, RequestFrame};
use crate::config::IpcConfig;
use crate::render::TemplateRef;
use crate::schema::Schema;
use crate::{NeutralError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Client connected to a render server.
#[derive(Debug)]
pub struct RenderClient {
    stream: Mutex<Option<TcpStream>>,
    addr: SocketAddr,
    response_timeout: Duration,
    max_frame_size: usize,
}

impl RenderClient {
    /// Connect using the default timeouts from `IpcConfig`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = Self::open(addr).await?;
        debug!("Render client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(Some(stream)),
            addr,
            response_timeout: IpcConfig::RESPONSE_TIMEOUT,
            max_frame_size: IpcConfig::MAX_FRAME_SIZE,
        })
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    async fn open(addr: SocketAddr) -> Result<TcpStream> {
        tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| NeutralError::ServerUnreachable {
                addr: addr.to_string(),
            })?
            .map_err(|_| NeutralError::ServerUnreachable {
                addr: addr.to_string(),
            })
    }

    /// Render a template with a typed schema.
    pub async fn submit(&self, template: TemplateRef, schema: &Schema) -> Result<RenderResponse> {
        self.send(RequestFrame::new(template, schema)).await
    }

    /// Render a template with schema JSON supplied by the caller.
    pub async fn submit_json(
        &self,
        template: TemplateRef,
        schema_json: impl Into<String>,
    ) -> Result<RenderResponse> {
        self.send(RequestFrame::from_json(template, schema_json)).await
    }

    /// Send one request and wait for its response.
    ///
    /// Transport failures drop the connection; the next call reconnects.
    pub async fn send(&self, frame: RequestFrame) -> Result<RenderResponse> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(Self::open(self.addr).await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(NeutralError::ServerUnreachable {
                addr: self.addr.to_string(),
            });
        };

        let result = tokio::time::timeout(self.response_timeout, async {
            let (mut reader, mut writer) = stream.split();
            write_request(&mut writer, &frame).await?;
            read_response(&mut reader, self.max_frame_size).await
        })
        .await
        .unwrap_or(Err(NeutralError::Timeout(self.response_timeout)));

        if let Err(e) = &result {
            debug!("Render request to {} failed, dropping connection: {}", self.addr, e);
            *guard = None;
        }
        result
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
