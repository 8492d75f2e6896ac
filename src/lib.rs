//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-playback`). Host applications can
//! depend on `audio-delivery-workspace` and enable the documented features
//! without needing to wire each crate individually.
//!
//! - `desktop-shims` (default): the service with cpal output and a UI
//!   dispatch thread as defaults
//! - `headless`: the service and playback crates with every bridge injected
//!   by the host

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_service as service;

#[cfg(feature = "headless")]
pub use core_playback as playback;
