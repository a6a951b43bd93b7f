//! Transport-abstract client for external tool servers.
//!
//! [`ToolClient`] is the single interface agents use to talk to MCP-style
//! tool servers; [`http::HttpToolClient`] and [`stdio::StdioToolClient`] are
//! the two concrete transports. Both must tolerate repeated `disconnect()`
//! calls and must reject `call()` after disconnect with
//! [`OrchestratorError::State`].

pub mod http;
pub mod stdio;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A reference to an external tool server an agent may open at `initialize()`.
#[derive(Debug, Clone)]
pub struct ToolServerRef {
    pub name: String,
    pub transport: TransportDescriptor,
}

#[derive(Debug, Clone)]
pub enum TransportDescriptor {
    Http(http::HttpConfig),
    Stdio(stdio::StdioConfig),
}

#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Establish the underlying connection (TCP handshake, process spawn, …).
    /// Must be safe to call at most once successfully; a second call before
    /// `disconnect()` is implementation-defined but must not leak resources.
    async fn connect(&self) -> Result<()>;

    /// Invoke a method on the remote server. `method` and the meaning of
    /// `params` are transport-specific (see the HTTP and stdio modules).
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Lightweight liveness check. Never retried by the client itself.
    async fn health_check(&self) -> Result<bool>;

    /// Release the underlying connection. Idempotent: calling twice is not
    /// an error. After this returns, every subsequent `call()` fails with
    /// `OrchestratorError::State`.
    async fn disconnect(&self) -> Result<()>;
}

/// Builds a [`ToolClient`] from a [`ToolServerRef`]. Grounded on the
/// agent runtime's requirement (§4.5) that clients be registered *before*
/// `connect()` is called, so a failed connect can still be cleaned up.
pub fn build_client(server: &ToolServerRef) -> Box<dyn ToolClient> {
    match &server.transport {
        TransportDescriptor::Http(cfg) => Box::new(http::HttpToolClient::new(cfg.clone())),
        TransportDescriptor::Stdio(cfg) => Box::new(stdio::StdioToolClient::new(cfg.clone())),
    }
}
