//! Core types: account sessions, selection set, status line, tracing

pub mod account;
pub mod status;
pub mod tracing;

pub use account::{AccountSession, ConnectionState, SelectionSet};
pub use status::{Severity, StatusLine};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
