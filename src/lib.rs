//! Proximity - exposure classification and health analytics for contact tracing.
//!
//! # Overview
//!
//! Proximity keeps, for every user and calendar day, a record of the devices
//! that user's phone was near and for how long. Cumulative same-day
//! durations are bucketed into contacts (two minutes or more) and close
//! contacts (ten minutes or more). New close contacts trigger an exposure
//! notification; the record tracks which close contacts the user has not
//! yet been told about.
//!
//! Separately, daily health survey submissions are rolled up into a
//! date-ranged report for epidemiological reporting.
//!
//! # Modules
//!
//! - [`classifier`]: Duration thresholds and severity transitions
//! - [`ledger`]: Per-user, per-day contact records
//! - [`tracker`]: Whether a record needs a notification
//! - [`notifier`]: Background evaluation, dispatch and resolution
//! - [`dispatch`]: The fixed exposure alert and its delivery outcome
//! - [`aggregation`]: Date-ranged health survey reports
//! - [`collaborators`]: Storage, survey and push interfaces
//! - [`storage`]: SQLite storage layer
//! - [`delivery`]: Push provider client
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration

pub mod aggregation;
pub mod api;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod notifier;
pub mod storage;
pub mod tracker;

pub use error::{Error, Result};
