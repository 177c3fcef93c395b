// Unit tests for RelayGuard components
// These tests run without external dependencies

pub mod backoff;
pub mod dlq;
