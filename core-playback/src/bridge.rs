//! # Ring Buffer Bridge
//!
//! Moves PCM from the engine's ring region into the host render graph.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──new()──▶ WaitingForEngineBuffer ──initialize()──▶ Active
//!                                   │                                 │
//!                                   └──────── timeout / dispose() ────┴──▶ Disposed
//! ```
//!
//! The engine allocates its ring only after the first load, so
//! [`RingBufferBridge::initialize`] polls for the region before opening the
//! render stream.
//!
//! ## Render thread contract
//!
//! The quantum handler runs on the host's audio thread. It performs one
//! atomic load of the write cursor, a bounded copy, and a `try_lock` of the
//! active state. It never blocks, never logs, and never allocates in the
//! steady state: a single call serves at most `nominal_quantum_samples`
//! frames, which always fit a pooled frame. When disposal holds the lock the
//! quantum contributes no frame.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{
    AudioFormat, AudioOutputHost, EngineAudioBuffer, EngineRegion, QuantumSource, RenderStream,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};
use crate::frame_pool::FramePool;
use crate::ring_buffer::EngineRingBuffer;

// ============================================================================
// State & Statistics
// ============================================================================

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    /// No bridge exists yet.
    Uninitialized,
    /// Constructed; the engine has not published its ring region.
    WaitingForEngineBuffer,
    /// Serving quanta to the render graph.
    Active,
    /// Terminal.
    Disposed,
}

impl BridgeState {
    fn as_u8(self) -> u8 {
        match self {
            BridgeState::Uninitialized => 0,
            BridgeState::WaitingForEngineBuffer => 1,
            BridgeState::Active => 2,
            BridgeState::Disposed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BridgeState::WaitingForEngineBuffer,
            2 => BridgeState::Active,
            3 => BridgeState::Disposed,
            _ => BridgeState::Uninitialized,
        }
    }
}

/// Counters accumulated by the render callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Quanta that contributed a frame.
    pub quanta_served: u64,
    /// Quanta that found the ring empty.
    pub underruns: u64,
    /// Total bytes handed to the render graph.
    pub bytes_copied: u64,
}

#[derive(Default)]
struct Counters {
    quanta_served: AtomicU64,
    underruns: AtomicU64,
    bytes_copied: AtomicU64,
}

struct ActiveState {
    ring: EngineRingBuffer,
    pool: FramePool,
}

struct Shared {
    format: AudioFormat,
    quantum_samples: usize,
    state: AtomicU8,
    active: Mutex<Option<ActiveState>>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BridgeState) -> BridgeState {
        BridgeState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel))
    }

    fn stats(&self) -> BridgeStats {
        BridgeStats {
            quanta_served: self.counters.quanta_served.load(Ordering::Relaxed),
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            bytes_copied: self.counters.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// Read-only handle onto a bridge's state and counters.
#[derive(Clone)]
pub struct BridgeMonitor {
    shared: Arc<Shared>,
}

impl BridgeMonitor {
    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }
}

impl std::fmt::Debug for BridgeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMonitor")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// RingBufferBridge
// ============================================================================

/// Connects the engine ring region to one render stream.
pub struct RingBufferBridge {
    shared: Arc<Shared>,
    engine_buffer: Option<Arc<dyn EngineAudioBuffer>>,
    host: Arc<dyn AudioOutputHost>,
    stream: Option<Box<dyn RenderStream>>,
    config: PlaybackConfig,
}

impl RingBufferBridge {
    /// Create a bridge for a negotiated format. The bridge starts in
    /// [`BridgeState::WaitingForEngineBuffer`].
    pub fn new(
        format: AudioFormat,
        engine_buffer: Arc<dyn EngineAudioBuffer>,
        host: Arc<dyn AudioOutputHost>,
        config: PlaybackConfig,
    ) -> Result<Self> {
        if format.frame_size() == 0 {
            return Err(PlaybackError::InvalidFormat(format!(
                "{} channels of {} bytes has no frame size",
                format.channels, format.bytes_per_sample
            )));
        }

        let shared = Arc::new(Shared {
            format,
            quantum_samples: config.nominal_quantum_samples.max(1),
            state: AtomicU8::new(BridgeState::WaitingForEngineBuffer.as_u8()),
            active: Mutex::new(None),
            counters: Counters::default(),
        });

        Ok(Self {
            shared,
            engine_buffer: Some(engine_buffer),
            host,
            stream: None,
            config,
        })
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    pub fn monitor(&self) -> BridgeMonitor {
        BridgeMonitor {
            shared: self.shared.clone(),
        }
    }

    /// Wait for the engine's ring region, attach to it, and start rendering.
    ///
    /// Calling this on an active bridge is a no-op.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::RingBufferTimeout`] if the region does not appear
    ///   within `buffer_wait_timeout`. The bridge is disposed.
    /// - [`PlaybackError::InvalidRingBuffer`] if the region cannot hold a
    ///   single frame. The bridge is disposed.
    /// - [`PlaybackError::AudioDeviceError`] if the render stream cannot be
    ///   opened or started. The bridge is disposed.
    /// - [`PlaybackError::BridgeDisposed`] after disposal.
    pub async fn initialize(&mut self) -> Result<()> {
        match self.state() {
            BridgeState::Active => return Ok(()),
            BridgeState::Disposed => return Err(PlaybackError::BridgeDisposed),
            _ => {}
        }

        let buffer = self
            .engine_buffer
            .clone()
            .ok_or(PlaybackError::BridgeDisposed)?;
        let timeout = self.config.buffer_wait_timeout;

        debug!(
            poll_ms = self.config.buffer_poll_interval.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for engine ring buffer"
        );

        let region = match wait_for_region(buffer.clone(), self.config.buffer_poll_interval, timeout)
            .await
        {
            Some(region) => region,
            None => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Engine ring buffer never appeared");
                self.dispose();
                return Err(PlaybackError::RingBufferTimeout { waited: timeout });
            }
        };

        let format = self.shared.format;
        let frame_size = format.frame_size();
        if region.capacity() < frame_size {
            self.dispose();
            return Err(PlaybackError::InvalidRingBuffer(format!(
                "capacity {} is smaller than one {frame_size}-byte frame",
                region.capacity()
            )));
        }

        let descriptor = buffer.pcm_descriptor();
        if descriptor.sample_rate != format.sample_rate || descriptor.channels != format.channels {
            warn!(
                engine_rate = descriptor.sample_rate,
                engine_channels = descriptor.channels,
                sample_rate = format.sample_rate,
                channels = format.channels,
                "Engine PCM descriptor differs from negotiated format"
            );
        }

        let ring = EngineRingBuffer::attach(buffer, region);
        let mut pool = FramePool::new(
            self.config.frame_pool_size,
            self.config.nominal_quantum_samples * frame_size,
        );
        pool.preallocate();

        info!(
            capacity = ring.capacity(),
            frame_size,
            pool_size = pool.pool_size(),
            "Attached to engine ring buffer"
        );

        *self.shared.active.lock() = Some(ActiveState { ring, pool });
        self.shared.set_state(BridgeState::Active);

        let source = Box::new(BridgeSource {
            shared: self.shared.clone(),
        });
        let stream = match self.host.open(&format, source) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Failed to open render stream");
                self.dispose();
                return Err(PlaybackError::AudioDeviceError(e.to_string()));
            }
        };

        if let Err(e) = stream.start() {
            warn!(error = %e, "Failed to start render stream");
            self.stream = Some(stream);
            self.dispose();
            return Err(PlaybackError::AudioDeviceError(e.to_string()));
        }
        self.stream = Some(stream);

        Ok(())
    }

    /// Resume the render stream. No-op unless active.
    pub fn start(&self) -> Result<()> {
        self.with_stream(|stream| stream.start())
    }

    /// Suspend the render stream without releasing anything. No-op unless
    /// active.
    pub fn stop(&self) -> Result<()> {
        self.with_stream(|stream| stream.stop())
    }

    fn with_stream<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&dyn RenderStream) -> bridge_traits::error::Result<()>,
    {
        match self.state() {
            BridgeState::Disposed => Err(PlaybackError::BridgeDisposed),
            BridgeState::Active => match &self.stream {
                Some(stream) => {
                    f(stream.as_ref()).map_err(|e| PlaybackError::AudioDeviceError(e.to_string()))
                }
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Stop serving quanta and release the stream, the pooled frames, and the
    /// engine buffer handle. Idempotent.
    pub fn dispose(&mut self) {
        if self.shared.set_state(BridgeState::Disposed) == BridgeState::Disposed {
            return;
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                debug!(error = %e, "Render stream stop failed during dispose");
            }
            drop(stream);
        }

        if let Some(mut active) = self.shared.active.lock().take() {
            active.pool.clear();
        }
        self.engine_buffer = None;

        info!(stats = ?self.shared.stats(), "Ring buffer bridge disposed");
    }
}

impl Drop for RingBufferBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn wait_for_region(
    buffer: Arc<dyn EngineAudioBuffer>,
    poll: Duration,
    timeout: Duration,
) -> Option<EngineRegion> {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::time::timeout(timeout, async {
        loop {
            ticker.tick().await;
            if let Some(region) = buffer.region() {
                return region;
            }
        }
    })
    .await
    .ok()
}

// ============================================================================
// Render Callback
// ============================================================================

/// Quantum handler installed into the render stream.
struct BridgeSource {
    shared: Arc<Shared>,
}

impl QuantumSource for BridgeSource {
    fn render(&mut self, required_samples: usize, submit: &mut dyn FnMut(&[u8])) -> usize {
        let shared = &self.shared;
        if shared.state() != BridgeState::Active {
            return 0;
        }
        let Some(mut guard) = shared.active.try_lock() else {
            return 0;
        };
        let Some(active) = guard.as_mut() else {
            return 0;
        };

        // Larger requests are served in nominal-quantum pieces so every
        // frame comes out of the pool; the host calls again for the rest.
        let frame_size = shared.format.frame_size();
        let requested = required_samples
            .min(shared.quantum_samples)
            .saturating_mul(frame_size);
        let len = active.ring.readable(requested, frame_size);
        if len == 0 {
            shared.counters.underruns.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let mut frame = active.pool.acquire(len);
        let len = {
            let mut bytes = frame.write(len);
            let copied = active.ring.read_into(&mut bytes, frame_size);
            bytes.truncate(copied);
            copied
        };
        submit(frame.as_bytes());
        active.pool.release(frame);

        shared.counters.quanta_served.fetch_add(1, Ordering::Relaxed);
        shared
            .counters
            .bytes_copied
            .fetch_add(len as u64, Ordering::Relaxed);
        len
    }
}
