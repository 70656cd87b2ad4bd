//! # Metering Server
//!
//! HTTP surface of the metering gateway.
//!
//! This crate provides:
//! - Axum-based HTTP server with graceful shutdown
//! - Signed subscription webhook ingestion endpoint
//! - Metered chat endpoint (select → estimate → enforce → generate →
//!   reconcile)
//! - Usage, snapshot, and audit read APIs for users and operators

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

pub use client::{Completion, CompletionClient, CompletionError, HttpCompletionClient};
pub use error::ApiError;
pub use logging::{init_logging, LoggingConfig, LoggingError};
pub use routes::create_router;
pub use server::{serve, ServerError};
pub use shutdown::{shutdown_signal, ShutdownCoordinator};
pub use state::AppState;
