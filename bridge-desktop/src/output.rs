//! cpal Audio Output
//!
//! [`CpalOutputHost`] answers format probes from the device's supported
//! configurations and renders a [`QuantumSource`] through a raw cpal stream.
//!
//! cpal streams are not `Send` on every platform, so each opened stream lives
//! on its own thread and the returned [`RenderStream`] drives it over a
//! command channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{AudioFormat, AudioOutputHost, QuantumSource, RenderStream, SampleEncoding};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

/// Desktop output through the system's default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalOutputHost {
    device_name: Option<String>,
}

impl CpalOutputHost {
    /// Output on the host's default device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output on the first device whose name contains `needle`
    /// (case-insensitive).
    pub fn with_device_name(needle: impl Into<String>) -> Self {
        Self {
            device_name: Some(needle.into()),
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

impl AudioOutputHost for CpalOutputHost {
    fn probe(
        &self,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
        encoding: SampleEncoding,
    ) -> Result<u16> {
        let sample_format = sample_format_for(bits_per_sample, encoding)?;
        let device = pick_device(self.device_name.as_deref())?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| BridgeError::OperationFailed(format!("query output configs: {e}")))?
            .any(|range| {
                range.channels() == channels
                    && range.sample_format() == sample_format
                    && range.min_sample_rate() <= sample_rate
                    && sample_rate <= range.max_sample_rate()
            });

        if !supported {
            return Err(BridgeError::Unsupported(format!(
                "{sample_format:?} at {sample_rate} Hz / {channels} ch"
            )));
        }

        Ok(sample_format.sample_size() as u16)
    }

    fn open(
        &self,
        format: &AudioFormat,
        source: Box<dyn QuantumSource>,
    ) -> Result<Box<dyn RenderStream>> {
        let format = *format;
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (command_tx, command_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_output_thread(device_name, format, source, ready_tx, command_rx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                commands: Some(command_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(BridgeError::OperationFailed(
                    "audio output thread exited during setup".to_string(),
                ))
            }
        }
    }
}

/// Map an engine sample layout onto the cpal sample format of the same
/// width. Packed 24-bit has no cpal counterpart.
fn sample_format_for(bits_per_sample: u16, encoding: SampleEncoding) -> Result<cpal::SampleFormat> {
    match (encoding, bits_per_sample) {
        (SampleEncoding::Float, 64) => Ok(cpal::SampleFormat::F64),
        (SampleEncoding::Float, 32) => Ok(cpal::SampleFormat::F32),
        (SampleEncoding::SignedInt, 32) => Ok(cpal::SampleFormat::I32),
        (SampleEncoding::SignedInt, 16) => Ok(cpal::SampleFormat::I16),
        (encoding, bits) => Err(BridgeError::Unsupported(format!(
            "{bits}-bit {encoding:?} samples"
        ))),
    }
}

fn pick_device(needle: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(needle) = needle {
        let needle_lc = needle.to_lowercase();
        let devices = host
            .output_devices()
            .map_err(|e| BridgeError::OperationFailed(format!("enumerate output devices: {e}")))?;
        for device in devices {
            let matched = device
                .description()
                .map(|d| d.name().to_lowercase().contains(&needle_lc))
                .unwrap_or(false);
            if matched {
                return Ok(device);
            }
        }
        return Err(BridgeError::NotAvailable(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| BridgeError::NotAvailable("no default output device".to_string()))
}

// ============================================================================
// Stream Thread
// ============================================================================

enum StreamCommand {
    Start(mpsc::Sender<Result<()>>),
    Stop(mpsc::Sender<Result<()>>),
}

fn run_output_thread(
    device_name: Option<String>,
    format: AudioFormat,
    source: Box<dyn QuantumSource>,
    ready: mpsc::SyncSender<Result<()>>,
    commands: mpsc::Receiver<StreamCommand>,
) {
    let running = Arc::new(AtomicBool::new(false));
    let stream = match build_stream(device_name.as_deref(), &format, source, running.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Some backends start streams on creation.
    if let Err(e) = stream.pause() {
        debug!("stream pause unsupported at open: {e}");
    }
    if ready.send(Ok(())).is_err() {
        return;
    }

    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        bits = format.bits_per_sample,
        "Audio output stream opened"
    );

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Start(reply) => {
                running.store(true, Ordering::Release);
                let result = stream
                    .play()
                    .map_err(|e| BridgeError::OperationFailed(format!("start stream: {e}")));
                let _ = reply.send(result);
            }
            StreamCommand::Stop(reply) => {
                running.store(false, Ordering::Release);
                if let Err(e) = stream.pause() {
                    // The callback renders silence while not running.
                    debug!("stream pause failed: {e}");
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    drop(stream);
    info!("Audio output stream closed");
}

fn build_stream(
    device_name: Option<&str>,
    format: &AudioFormat,
    mut source: Box<dyn QuantumSource>,
    running: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let device = pick_device(device_name)?;
    let sample_format = sample_format_for(format.bits_per_sample, format.encoding)?;
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let frame_size = format.frame_size();
    let mut panicked = false;

    let err_fn = |err| warn!("stream error: {err}");

    device
        .build_output_stream_raw(
            &config,
            sample_format,
            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                let out = data.bytes_mut();
                if panicked || !running.load(Ordering::Acquire) {
                    out.fill(0);
                    return;
                }
                let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
                    fill_quantum(source.as_mut(), &mut *out, frame_size)
                }));
                if rendered.is_err() {
                    panicked = true;
                    out.fill(0);
                    error!("Quantum source panicked, output silenced");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| BridgeError::OperationFailed(format!("build output stream: {e}")))
}

/// Pull whole frames from `source` until `out` is full or the source runs
/// dry, then pad with silence. Returns the number of bytes rendered.
fn fill_quantum(source: &mut dyn QuantumSource, out: &mut [u8], frame_size: usize) -> usize {
    let mut filled = 0;
    if frame_size > 0 {
        while filled < out.len() {
            let frames = (out.len() - filled) / frame_size;
            if frames == 0 {
                break;
            }
            let start = filled;
            let mut copied = 0;
            source.render(frames, &mut |bytes: &[u8]| {
                let offset = start + copied;
                let n = bytes.len().min(out.len() - offset);
                out[offset..offset + n].copy_from_slice(&bytes[..n]);
                copied += n;
            });
            if copied == 0 {
                break;
            }
            filled += copied;
        }
    }
    out[filled..].fill(0);
    filled
}

/// Handle on a stream owned by its output thread. Dropping it closes the
/// device and joins the thread.
struct CpalStream {
    commands: Option<mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn send(&self, make: impl FnOnce(mpsc::Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let closed = || BridgeError::OperationFailed("audio output thread is gone".to_string());
        let commands = self.commands.as_ref().ok_or_else(closed)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        commands.send(make(reply_tx)).map_err(|_| closed())?;
        reply_rx.recv().map_err(|_| closed())?
    }
}

impl RenderStream for CpalStream {
    fn start(&self) -> Result<()> {
        self.send(StreamCommand::Start)
    }

    fn stop(&self) -> Result<()> {
        self.send(StreamCommand::Stop)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio output thread panicked");
            }
        }
    }
}
