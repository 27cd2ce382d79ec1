// Spotify integration - the remote player we watch
// The monitor only talks to the `PlaybackProvider` trait; the Web API client lives behind `spotify`

#[cfg(feature = "spotify")]
pub mod auth;   // authorization-code login + token refresh
#[cfg(feature = "spotify")]
pub mod client; // Web API calls

#[cfg(feature = "spotify")]
pub use client::SpotifyClient;

use crate::playback::{RemotePlayback, RemoteTrack};
use async_trait::async_trait;
use thiserror::Error;

/// Longest Retry-After we honour. Anything above is treated as this.
pub const MAX_RETRY_AFTER_SECS: u64 = 15 * 60;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no client credentials configured")]
    MissingCredentials,

    #[error("access token rejected")]
    Unauthorized,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{endpoint} returned HTTP {status}")]
    Status { status: u16, endpoint: String },

    #[cfg(feature = "spotify")]
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Transient errors feed the backoff path; the rest just abort one cycle.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::MissingCredentials)
    }

    /// Minimum wait the provider asked for, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => {
                Some((*retry_after_secs).min(MAX_RETRY_AFTER_SECS).saturating_mul(1000))
            }
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Request/response view of the remote player. No push notifications, so
/// everything the monitor knows comes from polling these.
#[async_trait]
pub trait PlaybackProvider: Send + Sync {
    /// `None` when there is no active playback session.
    async fn get_current_playback(&self) -> ProviderResult<Option<RemotePlayback>>;

    /// Track ids of the provider's recently played list, newest first.
    async fn get_recently_played_tracks(&self) -> ProviderResult<Vec<String>>;

    async fn get_track(&self, track_id: &str) -> ProviderResult<RemoteTrack>;

    /// Remove a track from the user's saved library.
    async fn unfavorite(&self, track_id: &str) -> ProviderResult<bool>;

    fn has_credentials(&self) -> bool;

    fn set_credentials(&self, client_id: &str, client_secret: &str);
}
