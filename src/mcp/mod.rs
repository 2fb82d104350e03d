//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes the Fusion 360 bridge to AI assistants as tools, resources and
//! prompts, using JSON-RPC 2.0 messages over stdio or TCP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │   │  Transport  │───▶│   Session   │───▶│    Tools    │      │
//! │   │ (stdio/tcp) │    │ (lifecycle) │    │  (mapping)  │      │
//! │   └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                             │                  │             │
//! │                             ▼                  ▼             │
//! │                    ┌─────────────────────────────────┐       │
//! │                    │   Bridge (shared directory)     │       │
//! │                    └─────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{serve_stdio, serve_tcp, shutdown_signal, McpServer, ServerState};
pub use transport::{LineReader, LineWriter};
