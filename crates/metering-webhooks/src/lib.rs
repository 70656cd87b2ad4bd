//! # Metering Webhooks
//!
//! Ingestion of signed subscription lifecycle webhooks.
//!
//! The pipeline is verify → canonicalize → audit → apply:
//! - signatures cover the exact raw bytes and compare in constant time;
//!   with no secret configured every delivery is refused
//! - heterogeneous provider payloads parse into one [`CanonicalEvent`]
//!   before any business logic runs
//! - every accepted delivery appends an audit entry; profile mutation sets
//!   the asserted target state, never a delta

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod ingestor;
pub mod signature;

pub use error::{Result, WebhookError};
pub use event::CanonicalEvent;
pub use ingestor::{IngestOutcome, WebhookIngestor};
pub use signature::{sign, SignatureVerifier};
