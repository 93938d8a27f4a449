//! Model Context Protocol (MCP) implementation.
//!
//! This module implements the JSON-RPC 2.0 protocol core of MCP: message
//! classification, request/response correlation, the `initialize`
//! handshake, and routing of protocol methods to capability providers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Server                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │  Transport  │───▶│  Protocol   │───▶│   Server    │    │
//! │   │(stdio, mem) │    │ (dispatcher)│    │  (router)   │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! │          │                  │                  │            │
//! │          ▼                  ▼                  ▼            │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │  JSON-RPC   │    │  Handshake  │    │  Providers  │    │
//! │   │  Messages   │    │   (state)   │    │ (tools, …)  │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod capabilities;
pub mod dispatcher;
pub mod handshake;
pub mod protocol;
pub mod server;
pub mod transport;

pub use capabilities::{ServerCapabilities, ServerIdentity, ServerInfo};
pub use dispatcher::{Protocol, ProtocolOptions};
pub use handshake::HandshakeState;
pub use protocol::{
    ErrorCode, ErrorObject, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, MCP_PROTOCOL_VERSION,
};
pub use server::{Server, ServerBuilder};
pub use transport::{MemoryTransport, StdioTransport, Transport};
