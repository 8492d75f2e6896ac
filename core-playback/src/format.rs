//! # Format Negotiation
//!
//! Picks the PCM layout the engine will write into its ring region. The
//! layout must be one the output host can render without conversion, so
//! each candidate is probed against the host in a fixed preference order and
//! the first one the host accepts at the expected width wins.

use std::sync::Arc;

use bridge_traits::{AudioFormat, AudioOutputHost, EngineSampleFormat};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

/// Engine formats in preference order, widest first.
pub const CANDIDATE_FORMATS: [EngineSampleFormat; 6] = [
    EngineSampleFormat::F64,
    EngineSampleFormat::F32,
    EngineSampleFormat::S32,
    EngineSampleFormat::S24,
    EngineSampleFormat::S24_3,
    EngineSampleFormat::S16,
];

/// Outcome of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Format id handed to the engine at construction.
    pub engine_format: EngineSampleFormat,
    /// Layout handed to the output host and the ring buffer bridge.
    pub audio: AudioFormat,
}

/// Probes an [`AudioOutputHost`] for a layout shared with the engine.
pub struct FormatNegotiator {
    host: Arc<dyn AudioOutputHost>,
    sample_rate: u32,
    channels: u16,
}

impl FormatNegotiator {
    pub fn new(host: Arc<dyn AudioOutputHost>, config: &PlaybackConfig) -> Self {
        Self {
            host,
            sample_rate: config.probe_sample_rate,
            channels: config.probe_channels,
        }
    }

    /// Walk [`CANDIDATE_FORMATS`] and return the first one the host builds
    /// with the candidate's byte width.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::NoCompatibleFormat`] when every candidate is rejected.
    /// Not retried: the same host answers always give the same result.
    pub fn probe(&self) -> Result<NegotiatedFormat> {
        for candidate in CANDIDATE_FORMATS {
            let bits = candidate.bits_per_sample();
            let expected_bytes = candidate.bytes_per_sample();

            match self
                .host
                .probe(self.sample_rate, self.channels, bits, candidate.encoding())
            {
                Ok(bytes) if bytes == expected_bytes => {
                    let audio = AudioFormat {
                        sample_rate: self.sample_rate,
                        channels: self.channels,
                        bits_per_sample: bits,
                        bytes_per_sample: expected_bytes,
                        encoding: candidate.encoding(),
                    };
                    info!(
                        format = ?candidate,
                        sample_rate = self.sample_rate,
                        channels = self.channels,
                        "Negotiated PCM format"
                    );
                    return Ok(NegotiatedFormat {
                        engine_format: candidate,
                        audio,
                    });
                }
                Ok(bytes) => {
                    debug!(
                        format = ?candidate,
                        expected_bytes,
                        host_bytes = bytes,
                        "Host sample width differs, skipping"
                    );
                }
                Err(e) => {
                    debug!(format = ?candidate, error = %e, "Host rejected format");
                }
            }
        }

        warn!(
            sample_rate = self.sample_rate,
            channels = self.channels,
            "No PCM format accepted by the output host"
        );
        Err(PlaybackError::NoCompatibleFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedOutputHost;
    use bridge_traits::SampleEncoding;

    #[test]
    fn test_first_accepted_candidate_wins() {
        // Host rejects 64-bit float, accepts 32-bit float.
        let host = ScriptedOutputHost::new(|bits, encoding| match (bits, encoding) {
            (64, _) => None,
            (32, SampleEncoding::Float) => Some(4),
            _ => Some(bits / 8),
        });
        let negotiator = FormatNegotiator::new(Arc::new(host), &PlaybackConfig::default());

        let negotiated = negotiator.probe().unwrap();
        assert_eq!(negotiated.engine_format, EngineSampleFormat::F32);
        assert_eq!(negotiated.audio.frame_size(), 8);
        assert_eq!(negotiated.audio.sample_rate, 44_100);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        // Host builds every stream but always at 2 bytes per sample.
        let host = ScriptedOutputHost::new(|bits, _| (bits != 64).then_some(2));
        let negotiated = FormatNegotiator::new(Arc::new(host), &PlaybackConfig::default())
            .probe()
            .unwrap();
        assert_eq!(negotiated.engine_format, EngineSampleFormat::S16);
        assert_eq!(negotiated.audio.bytes_per_sample, 2);
    }

    #[test]
    fn test_padded_24_bit_preferred_over_packed() {
        let host = ScriptedOutputHost::new(|bits, encoding| match (bits, encoding) {
            (24, SampleEncoding::SignedInt) => Some(4),
            _ => None,
        });
        let negotiated = FormatNegotiator::new(Arc::new(host), &PlaybackConfig::default())
            .probe()
            .unwrap();
        assert_eq!(negotiated.engine_format, EngineSampleFormat::S24);
    }

    #[test]
    fn test_packed_24_bit_when_host_reports_three_bytes() {
        let host = ScriptedOutputHost::new(|bits, encoding| match (bits, encoding) {
            (24, SampleEncoding::SignedInt) => Some(3),
            _ => None,
        });
        let negotiated = FormatNegotiator::new(Arc::new(host), &PlaybackConfig::default())
            .probe()
            .unwrap();
        assert_eq!(negotiated.engine_format, EngineSampleFormat::S24_3);
        assert_eq!(negotiated.audio.frame_size(), 6);
    }

    #[test]
    fn test_all_rejected_is_no_compatible_format() {
        let host = ScriptedOutputHost::new(|_, _| None);
        let result = FormatNegotiator::new(Arc::new(host), &PlaybackConfig::default()).probe();
        assert!(matches!(result, Err(PlaybackError::NoCompatibleFormat)));
    }

    #[test]
    fn test_probe_is_deterministic() {
        let host: Arc<dyn AudioOutputHost> =
            Arc::new(ScriptedOutputHost::new(|bits, _| (bits <= 32).then_some(bits / 8)));
        let negotiator = FormatNegotiator::new(host, &PlaybackConfig::default());

        let first = negotiator.probe().unwrap();
        for _ in 0..5 {
            assert_eq!(negotiator.probe().unwrap(), first);
        }
        assert_eq!(first.engine_format, EngineSampleFormat::F32);
    }

    #[test]
    fn test_probe_uses_configured_rate_and_channels() {
        let host = ScriptedOutputHost::new(|bits, _| Some(bits / 8));
        let probes = host.probes();
        let config = PlaybackConfig {
            probe_sample_rate: 48_000,
            probe_channels: 1,
            ..Default::default()
        };

        FormatNegotiator::new(Arc::new(host), &config).probe().unwrap();
        let recorded = probes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], (48_000, 1, 64));
    }
}
