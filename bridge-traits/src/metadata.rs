//! Catalog Metadata and Credentials
//!
//! The remote catalog (track names, artists, artwork) and the login flow are
//! host concerns. The core only needs to look a track up by id and to know
//! whether the access token it holds is still valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::Result, platform::PlatformSendSync, time::Clock};

/// Artist credit on a catalog track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistCredit {
    pub id: String,
    pub name: String,
}

/// Album artwork at one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Catalog view of a track, richer than what the engine reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistCredit>,
    pub album: Option<String>,
    /// Largest image first.
    pub images: Vec<ArtworkImage>,
    pub duration_ms: u32,
}

impl TrackMetadata {
    /// Artists joined for display, e.g. `"A, B"`.
    pub fn artist_line(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn cover_url(&self) -> Option<&str> {
        self.images.first().map(|img| img.url.as_str())
    }
}

/// Looks tracks up in the remote catalog.
///
/// # Example
///
/// ```ignore
/// if let Some(meta) = provider.track_metadata("4uLU6hMCjMI75M1A2tKUQC").await? {
///     println!("{} by {}", meta.name, meta.artist_line());
/// }
/// ```
#[async_trait::async_trait]
pub trait TrackMetadataProvider: PlatformSendSync {
    /// Fetch metadata for a bare track id. `Ok(None)` when the catalog has no
    /// such track.
    async fn track_metadata(&self, track_id: &str) -> Result<Option<TrackMetadata>>;
}

/// Access token issued by the host's login flow.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        clock.now() >= self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
