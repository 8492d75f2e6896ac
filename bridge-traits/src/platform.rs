//! Platform-specific helper abstractions used to keep trait bounds aligned with
//! the threading guarantees of each target.
//!
//! Every bridge in this crate is called from at least two threads: the
//! application thread issuing commands and a host-owned thread (engine worker
//! or audio callback) delivering data. The marker traits below name those
//! bounds once so trait definitions stay short.

/// Marker trait for bridges shared between the application thread and host
/// threads.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync {}

/// Marker trait for values moved onto a host thread exactly once (render
/// callbacks, engine instances).
pub trait PlatformSend: Send {}

impl<T> PlatformSend for T where T: Send {}
