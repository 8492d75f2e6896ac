//! Audio output bridge traits and supporting PCM types.
//!
//! The host owns the pull-based render graph. It asks a [`QuantumSource`] for
//! a fixed number of samples on its real-time callback thread and copies
//! whatever bytes the source submits into the device buffer. The core decides
//! *what* to play; the host decides *when*.

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    platform::{PlatformSend, PlatformSendSync},
};

/// Numeric representation of a PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    Float,
    SignedInt,
}

/// Negotiated PCM layout shared by the engine and the output host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Significant bits per sample.
    pub bits_per_sample: u16,
    /// Storage width of one sample (24-bit may be 3 or 4).
    pub bytes_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl AudioFormat {
    /// Bytes per interleaved frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Whole frames contained in `bytes`.
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }
}

/// Supplies PCM to the render graph, one quantum at a time.
///
/// Called on the host's real-time thread: implementations must not block,
/// allocate unboundedly, or panic.
pub trait QuantumSource: PlatformSend {
    /// Produce at most `required_samples` frames. Each call to `submit` hands
    /// the host an immutable byte view that is valid only for the duration of
    /// that call. Returns the number of bytes submitted; zero means the graph
    /// should render silence for the rest of this quantum.
    ///
    /// A source may return fewer frames than requested while more are
    /// buffered. Hosts keep calling until the device buffer is full or a call
    /// returns zero.
    fn render(&mut self, required_samples: usize, submit: &mut dyn FnMut(&[u8])) -> usize;
}

/// A live output stream opened by [`AudioOutputHost::open`].
///
/// Dropping the stream releases the device.
pub trait RenderStream: PlatformSend {
    /// Begin (or resume) pulling quanta.
    fn start(&self) -> Result<()>;

    /// Suspend pulling quanta without releasing the device.
    fn stop(&self) -> Result<()>;
}

/// Platform audio output.
///
/// # Example
///
/// ```ignore
/// let bytes = host.probe(44_100, 2, 32, SampleEncoding::Float)?;
/// assert_eq!(bytes, 4);
/// ```
pub trait AudioOutputHost: PlatformSendSync {
    /// Ask the host whether it can build a stream with this layout.
    ///
    /// Returns the bytes per sample the host would use, or an error when the
    /// stream cannot be built.
    fn probe(
        &self,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
        encoding: SampleEncoding,
    ) -> Result<u16>;

    /// Open a stream pulling from `source`. The stream starts suspended.
    fn open(&self, format: &AudioFormat, source: Box<dyn QuantumSource>)
        -> Result<Box<dyn RenderStream>>;
}
