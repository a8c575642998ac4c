//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `link` - WebSocket link supervisor for reader/scanner processes
//! - `registry` - named link collection and the is_connected probe
//! - `backend` - REST client for the results backend

pub mod backend;
pub mod link;
pub mod registry;

// Re-export commonly used types
pub use backend::{BackendClient, BackendError};
pub use link::{LinkCallbacks, LinkConfig, LinkError, LinkStatus, LinkSupervisor};
pub use registry::LinkRegistry;
