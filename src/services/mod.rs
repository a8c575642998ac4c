//! Services - business logic and state management
//!
//! This module contains the core gateway services:
//! - `critical_section` - named, timeout-bounded mutual exclusion
//! - `session` - guarded periodic refresh and parameter updates
//! - `replay` - time-driven playback of recorded simulation steps

pub mod critical_section;
pub mod replay;
pub mod session;

// Re-export commonly used types
pub use critical_section::{CriticalSection, LockTimeout, SectionGuard};
pub use replay::{ReplayBackend, ReplayError, ReplayScheduler};
pub use session::{SessionError, SessionService};
