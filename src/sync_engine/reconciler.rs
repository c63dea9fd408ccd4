//! Merging poll results into the engine state

use crate::{
    playback::{PlaybackSnapshot, PollError},
    theme::{ColorTheme, ThemeResult},
};

use super::state::PlaybackState;

/// What a reconciliation did, and what the engine has to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The poll failed and the last known good state was kept
    Retained,
    /// Same track, progress snapped to the server's value
    Corrected,
    /// A different track (or none) is now reported
    TrackChanged {
        generation: u64,
        /// Artwork to derive a theme from for `generation`
        album_art_url: Option<String>,
    },
    /// The token was rejected. State is kept, re-authentication is needed.
    Unauthorized,
}

/// Merge one poll result into `state`.
///
/// A successful snapshot always overwrites the locally advanced progress.
/// Track identity is compared by track id alone. Failures never touch
/// progress or theme.
pub fn reconcile(
    state: &mut PlaybackState,
    result: Result<PlaybackSnapshot, PollError>,
) -> Reconciliation {
    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(PollError::Unauthorized) => {
            tracing::warn!("Playback endpoint rejected the bearer token");
            state.needs_reauth = true;
            return Reconciliation::Unauthorized;
        }
        Err(PollError::Malformed(reason)) => {
            tracing::warn!(%reason, "Skipping malformed playback response");
            return Reconciliation::Retained;
        }
        Err(e @ PollError::Transient { .. }) => {
            tracing::debug!(%e, "Keeping last known playback state");
            return Reconciliation::Retained;
        }
    };

    // No snapshot yet counts as nothing playing
    let track_changed = state.track_id() != snapshot.track_id.as_deref();

    state.needs_reauth = false;
    state.estimated_progress_ms = snapshot.server_progress_ms.min(snapshot.duration_ms);

    if !track_changed {
        tracing::debug!(
            progress = state.estimated_progress_ms,
            age = ?snapshot.fetched_at.elapsed(),
            "Progress snapped to server"
        );
        state.snapshot = Some(snapshot);
        return Reconciliation::Corrected;
    }

    state.theme_generation += 1;
    tracing::info!(
        previous = ?state.track_id(),
        current = ?snapshot.track_id,
        generation = state.theme_generation,
        "Track changed"
    );
    // The theme always belongs to the current generation
    state.theme = ColorTheme::NEUTRAL;
    let album_art_url = snapshot.album_art_url.clone();
    state.snapshot = Some(snapshot);
    Reconciliation::TrackChanged {
        generation: state.theme_generation,
        album_art_url,
    }
}

/// Apply a finished theme extraction if it still belongs to the current track.
///
/// Returns whether the theme was applied.
pub fn apply_theme(state: &mut PlaybackState, result: ThemeResult) -> bool {
    if result.generation != state.theme_generation {
        tracing::debug!(
            stale = result.generation,
            current = state.theme_generation,
            "Discarding theme for a superseded track"
        );
        return false;
    }
    state.theme = result.theme;
    true
}
