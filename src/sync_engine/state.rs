use serde::Serialize;

use crate::{playback::PlaybackSnapshot, theme::ColorTheme};

/// Everything the engine knows about the session. Only the engine loop writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    /// Last successfully fetched snapshot, `None` before the first one
    pub snapshot: Option<PlaybackSnapshot>,
    /// Locally advanced progress, always within `0..=duration_ms`
    pub estimated_progress_ms: u64,
    pub theme: ColorTheme,
    /// Bumped on every track change to tell stale theme results apart
    pub theme_generation: u64,
    /// The last poll was rejected and a fresh token is needed
    pub needs_reauth: bool,
}

impl PlaybackState {
    #[must_use]
    pub fn track_id(&self) -> Option<&str> {
        self.snapshot.as_ref()?.track_id.as_deref()
    }

    #[must_use]
    pub fn has_track(&self) -> bool {
        self.track_id().is_some()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.is_playing)
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.snapshot.as_ref().map_or(0, |s| s.duration_ms)
    }

    /// Render-ready view of the current state
    #[must_use]
    pub fn view(&self) -> NowPlayingView {
        let track = self.snapshot.as_ref().filter(|s| s.has_track());
        NowPlayingView {
            title: track.map(|s| s.title.clone()),
            artist_names: track.map(|s| s.artist_names.clone()).unwrap_or_default(),
            track_url: track.and_then(|s| s.track_url.clone()),
            duration_ms: self.duration_ms(),
            estimated_progress_ms: self.estimated_progress_ms,
            is_playing: self.is_playing(),
            theme: self.theme,
            needs_reauth: self.needs_reauth,
        }
    }
}

/// Immutable snapshot of what the presentation layer should show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NowPlayingView {
    /// `None` when nothing is playing
    pub title: Option<String>,
    pub artist_names: Vec<String>,
    pub track_url: Option<String>,
    pub duration_ms: u64,
    pub estimated_progress_ms: u64,
    pub is_playing: bool,
    pub theme: ColorTheme,
    pub needs_reauth: bool,
}

impl NowPlayingView {
    /// Progress in percent, `0` for tracks of unknown length
    #[must_use]
    pub fn progress_percent(&self) -> usize {
        if self.duration_ms == 0 {
            return 0;
        }
        (self.estimated_progress_ms.min(self.duration_ms) * 100 / self.duration_ms) as usize
    }
}
