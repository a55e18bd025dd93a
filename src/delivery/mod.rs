//! Push notification transports.
//!
//! # Providers
//!
//! - [`push`]: IBM Cloud Push Notifications REST API
//!
//! Transports only move a finished message to the provider. Deciding who
//! gets notified, and what counts as resolved, happens in
//! [`crate::notifier`].

pub mod push;

pub use push::{PushClient, PushConfig};
