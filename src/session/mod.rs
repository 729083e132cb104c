//! Session lifecycle and the pinned external surface.
//!
//! Submodules:
//! - `registry`: session id → server manager, with config fingerprinting
//! - `request`: tool-plane request options, server resolution, tool search
//! - `prompt`: JIT bootstrap system-prompt injection

pub mod prompt;
pub mod registry;
pub mod request;

// Re-exports for convenience
pub use prompt::{inject_bootstrap, jit_bootstrap_context, Message};
pub use registry::{config_fingerprint, SessionRegistry};
pub use request::{
    resolve_servers, search_available_tools, ToolPlaneOptions, ToolSearchRequest,
    ToolSearchResponse, ToolSearchResult,
};
