//! # pipewatch-live
//!
//! The tokio-based live layer of pipewatch: one persistent push connection,
//! the REST collaborator seam, the notification bridge, and the
//! reconciliation controller that merges both channels into a single
//! aggregate view.
//!
//! Nothing here is process-global. Each [`PushConnection`] and
//! [`AutomationController`] is an explicitly owned instance, so independent
//! consumers and tests get isolated state.

pub mod controller;
pub mod notify;
pub mod rest;
pub mod socket;

// Re-export commonly used types
pub use controller::{AutomationController, ControllerError, ControllerOptions};
pub use notify::{NotificationBridge, Notifier};
pub use rest::{ApiError, AutomationApi, RestClient};
pub use socket::{ConnectError, ConnectionConfig, ConnectionState, PushConnection};
