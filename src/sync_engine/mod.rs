mod backoff;
pub mod reconciler;
pub mod state;
pub mod ticker;


use std::{future::Future, ops::ControlFlow, sync::Arc, time::Duration};

use futures::{future::LocalBoxFuture, stream::FuturesUnordered, StreamExt as _};
use tokio::{
    select,
    sync::{watch, Notify},
    time::{sleep, Instant},
};

use crate::{
    playback::{PlaybackSnapshot, PollError},
    theme::ThemeResult,
    token::{BearerToken, TokenLookup, TokenProvider},
};

use backoff::Backoff;
use reconciler::{apply_theme, reconcile, Reconciliation};
use state::{NowPlayingView, PlaybackState};
use ticker::{advance, ProgressTicker};

/// Where snapshots come from
pub trait PlaybackSource {
    fn request_snapshot(&self, token: BearerToken) -> PollFuture;
}

/// Where themes come from. Results must never be partial.
pub trait ThemeSource {
    fn extract_theme(&self, image_url: String, generation: u64)
        -> LocalBoxFuture<'static, ThemeResult>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between two polls while the endpoint is healthy
    pub poll_interval: Duration,
    /// Period of the local progress interpolation
    pub tick_interval: Duration,
    /// Polls allowed in flight at once before new ones are skipped
    pub max_in_flight: usize,
    /// Upper bound of the poll delay after repeated transient failures
    pub max_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(1000),
            max_in_flight: 4,
            max_backoff: Duration::from_secs(60),
        }
    }
}

pub type PollFuture = LocalBoxFuture<'static, Result<PlaybackSnapshot, PollError>>;

/// Asks a running engine for an immediate poll.
#[derive(Debug, Clone)]
pub struct RefreshHandle(Arc<Notify>);

impl RefreshHandle {
    /// Poll now instead of waiting for the next scheduled poll.
    ///
    /// Requests made while a refresh is already pending are merged.
    pub fn refresh(&self) {
        self.0.notify_one();
    }
}

/// Owns the playback state for one authenticated session.
///
/// Polls, local ticks and theme extractions all complete inside one
/// cooperative loop, which is the only writer of the state.
pub struct SyncEngine<S, T, P> {
    source: S,
    themes: T,
    tokens: P,
    config: EngineConfig,
    state: PlaybackState,
    view: watch::Sender<NowPlayingView>,
    refresh: Arc<Notify>,
}

impl<S, T, P> SyncEngine<S, T, P>
where
    S: PlaybackSource,
    T: ThemeSource,
    P: TokenProvider,
{
    /// Create an engine and the receiving end of its view updates.
    pub fn new(
        source: S,
        themes: T,
        tokens: P,
        config: EngineConfig,
    ) -> (Self, watch::Receiver<NowPlayingView>) {
        let state = PlaybackState::default();
        let (view, views) = watch::channel(state.view());
        (
            Self {
                source,
                themes,
                tokens,
                config,
                state,
                view,
                refresh: Arc::default(),
            },
            views,
        )
    }

    #[must_use]
    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle(Arc::clone(&self.refresh))
    }

    /// Run until `shutdown` resolves or the token is revoked.
    ///
    /// Requests still in flight when the session ends are dropped, so their
    /// results are never applied.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let poll_timer = sleep(Duration::ZERO);
        tokio::pin!(poll_timer);

        let mut polls = FuturesUnordered::new();
        let mut extractions = FuturesUnordered::new();
        let mut ticker = ProgressTicker::new(self.config.tick_interval);
        let mut backoff = Backoff::new(self.config.poll_interval, self.config.max_backoff);
        let mut last_dispatch = Instant::now();
        let refresh = Arc::clone(&self.refresh);

        tracing::info!(config = ?self.config, "Sync engine started");

        loop {
            select! {
                () = &mut shutdown => {
                    tracing::info!("Session ended");
                    break;
                }
                () = &mut poll_timer => {
                    if self.dispatch_poll(&mut polls).await.is_break() {
                        break;
                    }
                    last_dispatch = Instant::now();
                    poll_timer.as_mut().reset(last_dispatch + backoff.delay());
                }
                () = refresh.notified() => {
                    tracing::debug!("Refresh requested");
                    if self.dispatch_poll(&mut polls).await.is_break() {
                        break;
                    }
                    last_dispatch = Instant::now();
                    poll_timer.as_mut().reset(last_dispatch + backoff.delay());
                }
                Some(result) = polls.next() => {
                    let transient = result.as_ref().err().is_some_and(PollError::is_transient);
                    let retry_after = match &result {
                        Err(PollError::Transient { retry_after, .. }) => *retry_after,
                        _ => None,
                    };
                    match reconcile(&mut self.state, result) {
                        Reconciliation::TrackChanged { generation, album_art_url: Some(url) } => {
                            tracing::debug!(generation, %url, "Requesting theme");
                            extractions.push(self.themes.extract_theme(url, generation));
                        }
                        Reconciliation::Unauthorized => self.tokens.on_unauthorized().await,
                        _ => {}
                    }
                    if transient {
                        let delay = backoff.record_failure(retry_after);
                        poll_timer.as_mut().reset(Instant::now() + delay);
                    } else if backoff.is_backing_off() {
                        backoff.reset();
                        poll_timer.as_mut().reset(last_dispatch + self.config.poll_interval);
                    }
                    ticker.follow(&self.state);
                    self.publish();
                }
                Some(result) = extractions.next() => {
                    if apply_theme(&mut self.state, result) {
                        self.publish();
                    }
                }
                () = ticker.tick() => {
                    if advance(&mut self.state, ticker.step_ms()) {
                        self.publish();
                    }
                }
            }
        }

        ticker.stop();
        if !polls.is_empty() || !extractions.is_empty() {
            tracing::debug!(
                polls = polls.len(),
                extractions = extractions.len(),
                "Dropping requests of the ended session"
            );
        }
    }

    /// Start one poll unless the in-flight cap is reached or no token is at hand.
    ///
    /// Breaks when the token provider revoked the session.
    async fn dispatch_poll(&self, polls: &mut FuturesUnordered<PollFuture>) -> ControlFlow<()> {
        let token = match self.tokens.bearer_token().await {
            TokenLookup::Ready(token) => token,
            TokenLookup::Unavailable => return ControlFlow::Continue(()),
            TokenLookup::Revoked => {
                tracing::info!("Bearer token revoked");
                return ControlFlow::Break(());
            }
        };
        if polls.len() >= self.config.max_in_flight {
            tracing::warn!(in_flight = polls.len(), "Too many polls in flight, skipping this one");
        } else {
            polls.push(self.source.request_snapshot(token));
        }
        ControlFlow::Continue(())
    }

    /// Send the view to the presentation layer if anything observable changed
    fn publish(&self) {
        let view = self.state.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}
