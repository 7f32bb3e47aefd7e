//! # pipewatch-core
//!
//! Core event and state model for pipewatch, the real-time sync layer of a
//! video-ingestion automation dashboard.
//!
//! This crate is framework-agnostic and carries no async runtime. It can be
//! used by:
//! - the tokio-based live layer (`pipewatch-live`)
//! - test harnesses that drive dispatch synchronously
//!
//! ## Key Concepts
//!
//! - **Envelope**: the typed wrapper around every push message, decoded once
//!   at the wire boundary
//! - **Router**: per-kind and wildcard listener fan-out with failure isolation
//! - **AutomationView**: the derived aggregate rebuilt from REST snapshots

pub mod automation;
pub mod envelope;
pub mod router;

// Re-export commonly used types
pub use automation::{AutomationOverview, AutomationView};
pub use envelope::{ControlFrame, DecodeError, EventKind, EventPayload, PushEnvelope};
pub use router::{EventRouter, SubscriptionHandle};
