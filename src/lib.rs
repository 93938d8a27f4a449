//! mcp-dispatch: the protocol core of the Model Context Protocol
//!
//! This library implements the JSON-RPC 2.0 based protocol spoken between an
//! agent-style client and a capability-providing server.
//!
//! # Architecture
//!
//! The protocol core does the hard work. Everything else plugs into it:
//!
//! - **Dispatcher**: correlates our requests with the peer's responses and
//!   routes the peer's requests and notifications to registered handlers
//! - **Handshake**: the `initialize` exchange and capability negotiation
//! - **Router**: maps protocol methods such as `tools/call` onto providers
//!
//! Transports and providers sit behind traits, with in-memory and stdio
//! implementations included.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation
//! - [`providers`]: Tool, resource, prompt and root providers

pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;
