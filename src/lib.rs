pub mod backoff;
pub mod breaker;
pub mod config;
pub mod dlq;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod notify;

pub use error::{RelayGuardError, Result};
pub use guard::{ProtectedCallError, ResilienceGuard};
