//! fusion-mcp-bridge: MCP server bridging AI assistants to Fusion 360
//!
//! The bridge has two halves that only share a directory:
//!
//! - **Protocol endpoint**: an MCP server that turns tool calls into
//!   command files and waits for the matching response files
//! - **Command relay**: a polling loop inside the CAD host that executes
//!   each command and writes its response
//!
//! # Modules
//!
//! - [`exchange`]: File formats and the shared directory
//! - [`endpoint`]: Sending commands and awaiting responses
//! - [`relay`]: Polling, dispatch and the host API
//! - [`catalog`]: Tools, resources and prompts on offer
//! - [`mcp`]: MCP protocol implementation
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types

pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod mcp;
pub mod relay;
