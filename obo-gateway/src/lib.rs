//! OBO Gateway
//!
//! Exposes a small set of tools over HTTP. Every invocation validates the
//! caller's bearer token, exchanges it on-behalf-of the caller for a token
//! scoped to the downstream API, performs the downstream call, and returns a
//! normalized [`ResultEnvelope`](envelope::ResultEnvelope).

#![warn(missing_docs)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod orchestrator;
pub mod routes;
pub mod tools;

pub use config::GatewayConfig;
pub use envelope::{ErrorCategory, ResultEnvelope};
pub use error::{DownstreamError, GatewayError, OperationError, Result};
pub use orchestrator::{CallContext, DownstreamContext, Operation, OperationDescriptor, ToolOrchestrator};
