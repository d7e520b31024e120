//! `mh-mcp-client`: MCP (Model Context Protocol) client runtime.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types and stdio framing.
//! - Stdio, HTTP and in-process stream transports.
//! - Launch planning for stdio servers: command parsing, `PATH`
//!   augmentation and isolation for package launchers such as `npx`.
//! - An [`McpClient`] per server with lazy handshake and timeouts.
//! - An [`McpHub`] that pools connections, names tools for LLM use and
//!   routes calls back to the right server.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mh_mcp_client::{Config, McpHub};
//!
//! let config: Config = toml::from_str(&raw)?;
//! let hub = McpHub::new(&config);
//!
//! let listing = hub.tool_definitions(&config.servers).await;
//! for def in &listing.definitions {
//!     println!("{} ({})", def.name, def.id);
//! }
//!
//! let output = hub
//!     .execute_tool("fs__read_file", json!({ "path": "/tmp/x" }), &listing.snapshot)
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod framing;
pub mod hub;
pub mod launch;
pub mod protocol;
pub mod routing;
pub mod stderr;
pub mod transport;

// Re-exports for convenience.
pub use client::{ClientSettings, McpClient};
pub use config::{Config, Lifecycle, ServerConfig, TransportConfig};
pub use diagnostics::{Diagnostics, TransportKind};
pub use error::{ExitInfo, McpError, TransportError};
pub use hub::{McpHub, ServerFailure, ToolListing};
pub use protocol::{InitializeResult, ToolInfo};
pub use routing::{RoutingSnapshot, ToolRoute, MAX_FUNCTION_NAME_LEN};
pub use transport::{Connector, DefaultConnector, McpTransport, StreamTransport};
