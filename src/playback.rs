//! Playback reports fetched from the remote service

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// One authoritative playback report, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    /// Stable identity of the reported track, `None` when nothing is playing
    pub track_id: Option<String>,
    pub title: String,
    pub artist_names: Vec<String>,
    /// Preferred artwork of the track's album
    pub album_art_url: Option<String>,
    /// External link to the track
    pub track_url: Option<String>,
    pub duration_ms: u64,
    /// Always within `0..=duration_ms`
    pub server_progress_ms: u64,
    pub is_playing: bool,
    pub fetched_at: Instant,
}

impl PlaybackSnapshot {
    /// A report of an account with no active playback session.
    #[must_use]
    pub fn nothing_playing(fetched_at: Instant) -> Self {
        Self {
            track_id: None,
            title: String::new(),
            artist_names: Vec::new(),
            album_art_url: None,
            track_url: None,
            duration_ms: 0,
            server_progress_ms: 0,
            is_playing: false,
            fetched_at,
        }
    }

    #[must_use]
    pub const fn has_track(&self) -> bool {
        self.track_id.is_some()
    }
}

/// Reasons a poll did not produce a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The bearer token was rejected
    #[error("bearer token was rejected")]
    Unauthorized,
    /// Network failure, timeout, rate limit or server error
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// The response did not match the expected schema
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl PollError {
    pub fn transient(reason: impl ToString) -> Self {
        Self::Transient {
            reason: reason.to_string(),
            retry_after: None,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
