//! Hand-written fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    AudioFormat, AudioOutputHost, EngineAudioBuffer, EngineRegion, PcmDescriptor, QuantumSource,
    RenderStream, SampleEncoding,
};
use parking_lot::Mutex;

/// Seeded xorshift64 generator for property-style tests.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..bound`.
    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// In-memory engine ring with a deterministic byte pattern.
pub struct TestEngineBuffer {
    storage: Box<[u8]>,
    ready: AtomicBool,
    write: AtomicUsize,
    read: AtomicUsize,
    polls: AtomicUsize,
    descriptor: PcmDescriptor,
}

impl TestEngineBuffer {
    fn build(capacity: usize, ready: bool) -> Arc<Self> {
        let storage: Vec<u8> = (0..capacity).map(|i| (i * 31 + 7) as u8).collect();
        Arc::new(Self {
            storage: storage.into_boxed_slice(),
            ready: AtomicBool::new(ready),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            descriptor: PcmDescriptor {
                format_id: 5,
                sample_rate: 44_100,
                channels: 2,
            },
        })
    }

    /// Region published immediately.
    pub fn with_pattern(capacity: usize) -> Arc<Self> {
        Self::build(capacity, true)
    }

    /// Region not yet allocated by the engine.
    pub fn pending(capacity: usize) -> Arc<Self> {
        Self::build(capacity, false)
    }

    pub fn publish_region(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_write_cursor(&self, position: usize) {
        self.write.store(position, Ordering::SeqCst);
    }

    /// Engine writes `len` more bytes.
    pub fn produce(&self, len: usize) {
        let capacity = self.storage.len();
        let next = (self.write.load(Ordering::SeqCst) + len) % capacity;
        self.write.store(next, Ordering::SeqCst);
    }

    pub fn force_read_cursor(&self, position: usize) {
        self.read.store(position, Ordering::SeqCst);
    }

    pub fn published_read_cursor(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }

    pub fn region_polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Bytes a correct reader sees for `len` bytes starting at `start`.
    pub fn expected(&self, start: usize, len: usize) -> Vec<u8> {
        let capacity = self.storage.len();
        (0..len).map(|i| self.storage[(start + i) % capacity]).collect()
    }
}

impl EngineAudioBuffer for TestEngineBuffer {
    fn region(&self) -> Option<EngineRegion> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.ready.load(Ordering::SeqCst) {
            return None;
        }
        // SAFETY: storage lives as long as self and is never written.
        unsafe { EngineRegion::from_raw_parts(self.storage.as_ptr() as *mut u8, self.storage.len()) }
    }

    fn write_cursor(&self) -> usize {
        self.write.load(Ordering::SeqCst)
    }

    fn set_read_cursor(&self, position: usize) {
        self.read.store(position, Ordering::SeqCst);
    }

    fn pcm_descriptor(&self) -> PcmDescriptor {
        self.descriptor
    }
}

type ProbeRule = Box<dyn Fn(u16, SampleEncoding) -> Option<u16> + Send + Sync>;
type SourceSlot = Arc<Mutex<Option<Box<dyn QuantumSource>>>>;

/// Output host whose probe answers come from a closure and whose render
/// thread is driven by hand through [`RenderHandle`].
pub struct ScriptedOutputHost {
    rule: ProbeRule,
    probes: Arc<Mutex<Vec<(u32, u16, u16)>>>,
    slot: SourceSlot,
    running: Arc<AtomicBool>,
    fail_open: bool,
}

impl ScriptedOutputHost {
    pub fn new<F>(rule: F) -> Self
    where
        F: Fn(u16, SampleEncoding) -> Option<u16> + Send + Sync + 'static,
    {
        Self {
            rule: Box::new(rule),
            probes: Arc::new(Mutex::new(Vec::new())),
            slot: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            fail_open: false,
        }
    }

    /// Accepts every layout at its natural width.
    pub fn accepting_all() -> Self {
        Self::new(|bits, _| Some(bits.div_ceil(8)))
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn probes(&self) -> Arc<Mutex<Vec<(u32, u16, u16)>>> {
        self.probes.clone()
    }

    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            slot: self.slot.clone(),
            running: self.running.clone(),
        }
    }
}

impl AudioOutputHost for ScriptedOutputHost {
    fn probe(
        &self,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
        encoding: SampleEncoding,
    ) -> BridgeResult<u16> {
        self.probes.lock().push((sample_rate, channels, bits_per_sample));
        (self.rule)(bits_per_sample, encoding)
            .ok_or_else(|| BridgeError::Unsupported(format!("{bits_per_sample}-bit")))
    }

    fn open(
        &self,
        _format: &AudioFormat,
        source: Box<dyn QuantumSource>,
    ) -> BridgeResult<Box<dyn RenderStream>> {
        if self.fail_open {
            return Err(BridgeError::OperationFailed("device busy".into()));
        }
        *self.slot.lock() = Some(source);
        Ok(Box::new(ScriptedStream {
            slot: self.slot.clone(),
            running: self.running.clone(),
        }))
    }
}

struct ScriptedStream {
    slot: SourceSlot,
    running: Arc<AtomicBool>,
}

impl RenderStream for ScriptedStream {
    fn start(&self) -> BridgeResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> BridgeResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.slot.lock().take();
    }
}

/// Test-side view of the render thread.
#[derive(Clone)]
pub struct RenderHandle {
    slot: SourceSlot,
    running: Arc<AtomicBool>,
}

impl RenderHandle {
    /// Request one quantum. `None` when no stream is open.
    pub fn pull(&self, required_samples: usize) -> Option<Vec<u8>> {
        let mut slot = self.slot.lock();
        let source = slot.as_mut()?;
        let mut out = Vec::new();
        let submitted = source.render(required_samples, &mut |bytes| out.extend_from_slice(bytes));
        assert_eq!(submitted, out.len());
        Some(out)
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
