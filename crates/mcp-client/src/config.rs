//! Configuration types, re-exported from `mh-domain`.
//!
//! The canonical definitions live in `mh_domain::config` so that the CLI
//! config loader can include them without depending on this crate.

pub use mh_domain::config::{
    ClientConfig, Config, Framing, HttpTransportConfig, LaunchConfig, Lifecycle, ServerConfig,
    StdioTransportConfig, TimeoutConfig, TransportConfig,
};
