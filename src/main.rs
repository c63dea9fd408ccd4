use anyhow::{Context as _, Result};
use clap::Parser as _;
use tokio::select;

use spotify::SpotifyClient;
use sync_engine::{RefreshHandle, SyncEngine};
use theme::ColorExtractor;
use token::TokenSource;

mod args;
mod output;
mod playback;
mod spotify;
mod sync_engine;
mod theme;
mod token;

#[cfg(test)]
mod test_server;

/// Turn every `SIGUSR1` into an immediate poll, e.g. from a Waybar `on-click`.
async fn forward_refresh_signals(refresh: RefreshHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::user_defined1()) {
            Ok(mut signals) => {
                while signals.recv().await.is_some() {
                    refresh.refresh();
                }
            }
            Err(e) => tracing::warn!(?e, "Failed to listen for SIGUSR1, manual refresh disabled"),
        }
    }
    #[cfg(not(unix))]
    drop(refresh);
    std::future::pending::<()>().await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = args::Args::parse();
    args.init_tracing_subscriber()?;

    let tokens = args.token_source()?;
    if let TokenSource::File(file) = &tokens {
        tracing::info!(path = %file.path().display(), "Reading bearer token from file");
    }

    let client = reqwest::Client::builder()
        .timeout(args.request_timeout())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let (engine, views) = SyncEngine::new(
        SpotifyClient::new(client.clone(), args.endpoint.clone()),
        ColorExtractor::new(client),
        tokens,
        args.engine_config(),
    );
    let refresh = engine.refresh_handle();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(?e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };
    let session = async {
        select! {
            () = engine.run(shutdown) => {}
            () = forward_refresh_signals(refresh) => {}
        }
    };

    let ((), printed) = tokio::join!(session, output::print_views(views, args.format));
    printed
}
