//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback core:
//! - Logging and tracing infrastructure
//! - Configuration and bridge injection
//! - Event bus for session and playback events
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions,
//! its `CoreConfig`, and the `EventBus` through which the playback session
//! announces state changes.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
