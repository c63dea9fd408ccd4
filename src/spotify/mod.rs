//! Polling client for the Spotify Web API playback endpoint

pub mod types;


use std::time::Duration;

use futures::{future::LocalBoxFuture, FutureExt as _};
use reqwest::{
    header::{HeaderMap, ACCEPT, RETRY_AFTER},
    Client, StatusCode,
};
use tokio::time::Instant;

use crate::{
    playback::{PlaybackSnapshot, PollError},
    sync_engine::PlaybackSource,
    token::BearerToken,
};

use types::CurrentlyPlaying;

pub const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";

/// Fetches the authoritative playback snapshot.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    client: Client,
    endpoint: String,
}

impl SpotifyClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Fetch one snapshot. Never touches engine state.
    ///
    /// # Errors
    ///
    /// See [`snapshot_from_response`] for how responses are classified.
    /// Network failures and timeouts are [`PollError::Transient`].
    pub async fn fetch_snapshot(&self, token: &BearerToken) -> Result<PlaybackSnapshot, PollError> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token.secret())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(?e, "Playback request failed");
                if e.is_timeout() {
                    PollError::transient("request timed out")
                } else {
                    PollError::transient(e)
                }
            })?;
        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.map_err(PollError::transient)?;
        tracing::debug!(%status, len = body.len(), "Playback response received");
        snapshot_from_response(status, retry_after, &body, Instant::now())
    }
}

impl PlaybackSource for SpotifyClient {
    fn request_snapshot(
        &self,
        token: BearerToken,
    ) -> LocalBoxFuture<'static, Result<PlaybackSnapshot, PollError>> {
        let client = self.clone();
        async move { client.fetch_snapshot(&token).await }.boxed_local()
    }
}

/// Seconds-valued `Retry-After` header
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a playback response.
///
/// `204 No Content`, an empty body, or a body without a track all mean
/// nothing is playing. The reported progress is clamped to the duration.
///
/// # Errors
///
/// - `401` is [`PollError::Unauthorized`]
/// - `429`, `5xx` and any other unexpected status are [`PollError::Transient`]
/// - A `200` body that fails to parse is [`PollError::Malformed`]
pub fn snapshot_from_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
    fetched_at: Instant,
) -> Result<PlaybackSnapshot, PollError> {
    match status {
        StatusCode::NO_CONTENT => return Ok(PlaybackSnapshot::nothing_playing(fetched_at)),
        StatusCode::OK => {}
        StatusCode::UNAUTHORIZED => return Err(PollError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            return Err(PollError::Transient {
                reason: "rate limited".to_owned(),
                retry_after,
            })
        }
        status => {
            return Err(PollError::Transient {
                reason: format!("unexpected status {status}"),
                retry_after: None,
            })
        }
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PlaybackSnapshot::nothing_playing(fetched_at));
    }
    let playing: CurrentlyPlaying =
        serde_json::from_slice(body).map_err(|e| PollError::Malformed(e.to_string()))?;
    let Some(track) = playing.item else {
        return Ok(PlaybackSnapshot::nothing_playing(fetched_at));
    };
    let track_id = track
        .id
        .or(track.uri)
        .ok_or_else(|| PollError::Malformed("track has neither id nor uri".to_owned()))?;

    Ok(PlaybackSnapshot {
        track_id: Some(track_id),
        title: track.name,
        artist_names: track.artists.into_iter().map(|a| a.name).collect(),
        album_art_url: track
            .album
            .and_then(|album| album.images.into_iter().next())
            .map(|image| image.url),
        track_url: track.external_urls.spotify,
        duration_ms: track.duration_ms,
        server_progress_ms: playing.progress_ms.unwrap_or(0).min(track.duration_ms),
        is_playing: playing.is_playing,
        fetched_at,
    })
}
