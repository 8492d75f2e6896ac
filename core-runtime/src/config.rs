//! # Core Configuration Module
//!
//! Builder-based configuration for the playback core.
//!
//! ## Overview
//!
//! [`CoreConfig`] carries the device identity announced to the remote service
//! and every host bridge the core needs. The builder fails fast with an
//! actionable message when a required bridge is missing.
//!
//! ## Required Dependencies
//!
//! - `EngineBackend` - The native decode engine. Never defaulted.
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `AudioOutputHost` - Desktop default: cpal (`desktop-shims`)
//! - `UiExecutor` - Desktop default: dedicated dispatcher thread
//! - `TrackMetadataProvider` - Catalog lookups; without it state carries
//!   engine-reported track info only
//! - `Clock` - Defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .device_name("Living Room PC")
//!     .cache_dir("/home/me/.cache/player")
//!     .engine_backend(Arc::new(MyEngine::load()?))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No engine backend injected
//! let config = CoreConfig::builder()
//!     .device_name("desk")
//!     .cache_dir("/tmp/cache")
//!     .build()
//!     .expect("Should fail - missing engine backend");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    AudioOutputHost, Bitrate, Clock, DeviceType, EngineBackend, EngineConfig, EngineSampleFormat,
    SystemClock, TrackMetadataProvider, UiExecutor,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Longest device name the remote service displays.
const MAX_DEVICE_NAME_LEN: usize = 64;

/// Device identity and engine options, independent of any credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_name: String,
    pub device_type: DeviceType,
    /// Engine cache for audio files and credentials blobs
    pub cache_dir: PathBuf,
    pub bitrate: Bitrate,
    pub features: FeatureFlags,
}

impl DeviceIdentity {
    /// Engine construction parameters for one negotiated format and token.
    pub fn engine_config(&self, format: EngineSampleFormat, access_token: &str) -> EngineConfig {
        EngineConfig {
            device_name: self.device_name.clone(),
            device_type: self.device_type,
            cache_dir: self.cache_dir.clone(),
            enable_discovery: self.features.enable_discovery,
            enable_volume_normalisation: self.features.enable_volume_normalisation,
            bitrate: self.bitrate,
            format,
            access_token: access_token.to_string(),
        }
    }
}

/// Optional engine behaviours. Both are off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Advertise the device on the local network for remote control
    pub enable_discovery: bool,

    /// Let the engine apply loudness normalisation
    pub enable_volume_normalisation: bool,
}

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub identity: DeviceIdentity,

    /// Capacity of the core event bus
    pub event_buffer_size: usize,

    /// Substring of the preferred output device name. `None` selects the
    /// host default.
    pub output_device: Option<String>,

    pub engine_backend: Arc<dyn EngineBackend>,

    pub output_host: Arc<dyn AudioOutputHost>,

    pub ui_executor: Arc<dyn UiExecutor>,

    pub metadata_provider: Option<Arc<dyn TrackMetadataProvider>>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("identity", &self.identity)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("output_device", &self.output_device)
            .field("engine_backend", &"EngineBackend { ... }")
            .field("output_host", &"AudioOutputHost { ... }")
            .field("ui_executor", &"UiExecutor { ... }")
            .field(
                "metadata_provider",
                &self
                    .metadata_provider
                    .as_ref()
                    .map(|_| "TrackMetadataProvider { ... }"),
            )
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Device name is present and displayable
    /// - Cache directory is not empty
    /// - Event buffer size is non-zero
    pub fn validate(&self) -> Result<()> {
        let name = self.identity.device_name.trim();
        if name.is_empty() {
            return Err(Error::Config("Device name cannot be empty".to_string()));
        }

        if name.chars().count() > MAX_DEVICE_NAME_LEN {
            return Err(Error::Config(format!(
                "Device name exceeds {} characters",
                MAX_DEVICE_NAME_LEN
            )));
        }

        if self.identity.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn engine_backend_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "EngineBackend".to_string(),
        message: "A decode engine backend is required. \
                 Load the native engine library and inject its adapter with .engine_backend()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_output_host(output_device: Option<&str>) -> Result<Arc<dyn AudioOutputHost>> {
    use bridge_desktop::CpalOutputHost;

    let host = match output_device {
        Some(name) => CpalOutputHost::with_device_name(name),
        None => CpalOutputHost::new(),
    };
    let host: Arc<dyn AudioOutputHost> = Arc::new(host);
    Ok(host)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_output_host(_output_device: Option<&str>) -> Result<Arc<dyn AudioOutputHost>> {
    Err(Error::CapabilityMissing {
        capability: "AudioOutputHost".to_string(),
        message: "An audio output host is required. \
                 Desktop: enable the 'desktop-shims' feature to use the cpal output. \
                 Other hosts: inject a platform audio output adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_ui_executor() -> Result<Arc<dyn UiExecutor>> {
    use bridge_desktop::ThreadUiExecutor;

    let executor = ThreadUiExecutor::spawn()
        .map_err(|e| Error::Internal(format!("Failed to start UI dispatcher thread: {}", e)))?;
    let executor: Arc<dyn UiExecutor> = Arc::new(executor);
    Ok(executor)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_ui_executor() -> Result<Arc<dyn UiExecutor>> {
    let executor: Arc<dyn UiExecutor> = Arc::new(bridge_traits::ImmediateExecutor);
    Ok(executor)
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    device_name: Option<String>,
    device_type: DeviceType,
    cache_dir: Option<PathBuf>,
    bitrate: Bitrate,
    features: FeatureFlags,
    event_buffer_size: Option<usize>,
    output_device: Option<String>,
    engine_backend: Option<Arc<dyn EngineBackend>>,
    output_host: Option<Arc<dyn AudioOutputHost>>,
    ui_executor: Option<Arc<dyn UiExecutor>>,
    metadata_provider: Option<Arc<dyn TrackMetadataProvider>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the name shown to other devices on the account.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().device_name("Study Desktop");
    /// ```
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Default: [`DeviceType::Computer`]
    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Sets the engine cache directory.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Default: [`Bitrate::B320`]
    pub fn bitrate(mut self, bitrate: Bitrate) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn enable_discovery(mut self, enabled: bool) -> Self {
        self.features.enable_discovery = enabled;
        self
    }

    pub fn enable_volume_normalisation(mut self, enabled: bool) -> Self {
        self.features.enable_volume_normalisation = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Sets the event bus capacity.
    ///
    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`]
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Prefers the first output device whose name contains `name`.
    ///
    /// Only consulted when the default output host is used.
    pub fn output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }

    /// Sets the decode engine backend (required).
    pub fn engine_backend(mut self, backend: Arc<dyn EngineBackend>) -> Self {
        self.engine_backend = Some(backend);
        self
    }

    /// Sets the audio output host.
    ///
    /// If not provided, the cpal host is used when the `desktop-shims`
    /// feature is enabled.
    pub fn output_host(mut self, host: Arc<dyn AudioOutputHost>) -> Self {
        self.output_host = Some(host);
        self
    }

    /// Sets the executor used to deliver state changes on the UI thread.
    pub fn ui_executor(mut self, executor: Arc<dyn UiExecutor>) -> Self {
        self.ui_executor = Some(executor);
        self
    }

    pub fn metadata_provider(mut self, provider: Arc<dyn TrackMetadataProvider>) -> Self {
        self.metadata_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the device name or cache directory is missing
    ///   or invalid
    /// - [`Error::CapabilityMissing`] when the engine backend is missing, or
    ///   when no output host is injected and `desktop-shims` is disabled
    pub fn build(self) -> Result<CoreConfig> {
        let device_name = self.device_name.ok_or_else(|| {
            Error::Config("Device name is required. Use .device_name() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let engine_backend = self
            .engine_backend
            .ok_or_else(engine_backend_missing_error)?;

        let output_host = match self.output_host {
            Some(host) => host,
            None => provide_default_output_host(self.output_device.as_deref())?,
        };

        let ui_executor = match self.ui_executor {
            Some(executor) => executor,
            None => provide_default_ui_executor()?,
        };

        let config = CoreConfig {
            identity: DeviceIdentity {
                device_name,
                device_type: self.device_type,
                cache_dir,
                bitrate: self.bitrate,
                features: self.features,
            },
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            output_device: self.output_device,
            engine_backend,
            output_host,
            ui_executor,
            metadata_provider: self.metadata_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
