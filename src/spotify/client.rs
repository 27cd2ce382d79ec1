use super::{auth, PlaybackProvider, ProviderError, ProviderResult};
use crate::playback::{Credentials, PlaybackContext, RemoteDevice, RemotePlayback, RemoteTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RECENTLY_PLAYED_LIMIT: u32 = 50;
/// Saves and unsaves made in other apps show up after at most this long.
const LIBRARY_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Library membership per track, each answer kept for `ttl`.
#[derive(Debug)]
struct LibraryCache {
    ttl: Duration,
    entries: HashMap<String, (bool, Instant)>,
}

impl LibraryCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn get(&self, track_id: &str, now: Instant) -> Option<bool> {
        self.entries
            .get(track_id)
            .filter(|(_, checked_at)| now.duration_since(*checked_at) < self.ttl)
            .map(|(saved, _)| *saved)
    }

    fn insert(&mut self, track_id: &str, saved: bool, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, checked_at)| now.duration_since(*checked_at) < ttl);
        self.entries.insert(track_id.to_string(), (saved, now));
    }
}

/// Spotify Web API client. Refreshes the access token once on a 401 and
/// briefly caches library membership per track.
pub struct SpotifyClient {
    http: Client,
    credentials: Mutex<Option<Credentials>>,
    tokens: Mutex<Tokens>,
    library_cache: Mutex<LibraryCache>,
}

impl SpotifyClient {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> ProviderResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            credentials: Mutex::new(None),
            tokens: Mutex::new(Tokens {
                access: access_token.filter(|t| !t.is_empty()),
                refresh: refresh_token.filter(|t| !t.is_empty()),
            }),
            library_cache: Mutex::new(LibraryCache::new(LIBRARY_CACHE_TTL)),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Current tokens, so a refreshed pair can be written back to the config.
    pub fn tokens(&self) -> (Option<String>, Option<String>) {
        let tokens = self.tokens.lock();
        (tokens.access.clone(), tokens.refresh.clone())
    }

    async fn refresh(&self) -> ProviderResult<String> {
        let credentials = self
            .credentials
            .lock()
            .clone()
            .ok_or(ProviderError::MissingCredentials)?;
        let refresh_token = self.tokens.lock().refresh.clone().ok_or(ProviderError::Unauthorized)?;

        let fresh = auth::refresh_token(&self.http, &credentials, &refresh_token).await?;
        info!("Spotify access token refreshed");

        let mut tokens = self.tokens.lock();
        tokens.access = Some(fresh.access_token.clone());
        if let Some(refresh) = fresh.refresh_token {
            tokens.refresh = Some(refresh);
        }
        Ok(fresh.access_token)
    }

    async fn access_token(&self) -> ProviderResult<String> {
        let cached = self.tokens.lock().access.clone();
        match cached {
            Some(token) => Ok(token),
            None => self.refresh().await,
        }
    }

    async fn send_once(&self, method: Method, path: &str, token: &str) -> ProviderResult<Response> {
        let url = format!("{}{}", API_BASE, path);
        Ok(self.http.request(method, url).bearer_auth(token).send().await?)
    }

    /// Send a request, refreshing the token and retrying once if it was rejected.
    async fn send(&self, method: Method, path: &str) -> ProviderResult<Response> {
        let token = self.access_token().await?;
        let response = self.send_once(method.clone(), path, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response, path);
        }

        debug!("{} returned 401, refreshing token", path);
        let token = self.refresh().await?;
        let response = self.send_once(method, path, &token).await?;
        check_status(response, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let response = self.send(Method::GET, path).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(format!("{}: {}", path, e)))
    }

    /// Whether a track is in the saved library.
    pub async fn is_saved(&self, track_id: &str) -> ProviderResult<bool> {
        let cached = self.library_cache.lock().get(track_id, Instant::now());
        if let Some(saved) = cached {
            return Ok(saved);
        }

        let flags: Vec<bool> = self
            .get_json(&format!("/me/tracks/contains?ids={}", track_id))
            .await?;
        let saved = flags.first().copied().unwrap_or(false);
        self.library_cache.lock().insert(track_id, saved, Instant::now());

        Ok(saved)
    }
}

fn check_status(response: Response, endpoint: &str) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = retry_after_secs(response.headers());
            warn!("Rate limited on {}, retry after {}s", endpoint, retry_after_secs);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        _ => Err(ProviderError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        }),
    }
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(1)
}

#[async_trait]
impl PlaybackProvider for SpotifyClient {
    async fn get_current_playback(&self) -> ProviderResult<Option<RemotePlayback>> {
        let response = self.send(Method::GET, "/me/player").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let player: PlayerResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("/me/player: {}", e)))?;

        let in_library = match player.track_id() {
            Some(id) => match self.is_saved(id).await {
                Ok(saved) => saved,
                Err(e) => {
                    debug!("Library lookup for {} failed: {}", id, e);
                    false
                }
            },
            None => false,
        };

        Ok(Some(player.into_remote(in_library)))
    }

    async fn get_recently_played_tracks(&self) -> ProviderResult<Vec<String>> {
        let history: RecentlyPlayed = self
            .get_json(&format!("/me/player/recently-played?limit={}", RECENTLY_PLAYED_LIMIT))
            .await?;
        Ok(history.items.into_iter().filter_map(|item| item.track.id).collect())
    }

    async fn get_track(&self, track_id: &str) -> ProviderResult<RemoteTrack> {
        let track: TrackObject = self.get_json(&format!("/tracks/{}", track_id)).await?;
        track
            .into_remote()
            .ok_or_else(|| ProviderError::Decode(format!("track {} has no id", track_id)))
    }

    async fn unfavorite(&self, track_id: &str) -> ProviderResult<bool> {
        self.send(Method::DELETE, &format!("/me/tracks?ids={}", track_id))
            .await?;
        self.library_cache.lock().insert(track_id, false, Instant::now());
        Ok(true)
    }

    fn has_credentials(&self) -> bool {
        let complete = self
            .credentials
            .lock()
            .as_ref()
            .map(Credentials::is_complete)
            .unwrap_or(false);
        let tokens = self.tokens.lock();
        complete && (tokens.access.is_some() || tokens.refresh.is_some())
    }

    fn set_credentials(&self, client_id: &str, client_secret: &str) {
        *self.credentials.lock() = Some(Credentials::new(client_id, client_secret));
    }
}

// Wire types, only the fields we read

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    is_playing: bool,
    progress_ms: Option<u64>,
    item: Option<TrackObject>,
    device: Option<DeviceObject>,
    context: Option<ContextObject>,
}

impl PlayerResponse {
    fn track_id(&self) -> Option<&str> {
        self.item.as_ref().and_then(|item| item.id.as_deref())
    }

    fn into_remote(self, is_in_library: bool) -> RemotePlayback {
        RemotePlayback {
            is_playing: self.is_playing,
            progress_ms: self.progress_ms,
            track: self.item.and_then(TrackObject::into_remote),
            device: self.device.map(|d| RemoteDevice {
                name: d.name,
                kind: d.kind,
                volume_percent: d.volume_percent,
            }),
            context: self.context.map(|c| PlaybackContext::from_uri(c.kind, c.uri)),
            is_in_library,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>, // local files have none
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    album: Option<AlbumObject>,
    #[serde(default)]
    duration_ms: u64,
}

impl TrackObject {
    fn into_remote(self) -> Option<RemoteTrack> {
        Some(RemoteTrack {
            id: self.id?,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album: self.album.map(|a| a.name),
            duration_ms: self.duration_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeviceObject {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    volume_percent: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ContextObject {
    #[serde(rename = "type")]
    kind: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct RecentlyPlayed {
    items: Vec<PlayHistoryItem>,
}

#[derive(Debug, Deserialize)]
struct PlayHistoryItem {
    track: TrackObject,
}
