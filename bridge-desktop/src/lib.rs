//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `AudioOutputHost` using `cpal` raw output streams
//! - `UiExecutor` using a dedicated dispatcher thread
//!
//! The decode engine backend is never provided here; it wraps a native
//! library and is always injected by the host.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{CpalOutputHost, ThreadUiExecutor};
//!
//! let config = CoreConfig::builder()
//!     .device_name("Desk")
//!     .cache_dir(cache_dir)
//!     .engine_backend(backend)
//!     .output_host(Arc::new(CpalOutputHost::with_device_name("USB")))
//!     .ui_executor(Arc::new(ThreadUiExecutor::spawn()?))
//!     .build()?;
//! ```

mod executor;
mod output;

pub use executor::ThreadUiExecutor;
pub use output::CpalOutputHost;
