//! `mh-domain`: value types shared by the MCP runtime and its callers.
//!
//! Pure data: server configuration, runtime settings and the caller-facing
//! tool definition. No I/O lives here.

pub mod config;
pub mod tool;
