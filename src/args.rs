use std::{fs::File, io, path::PathBuf, sync::Mutex, time::Duration};

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::{
    output::OutputFormat,
    spotify::CURRENTLY_PLAYING_URL,
    sync_engine::EngineConfig,
    token::{BearerToken, StaticToken, TokenFile, TokenSource, DEFAULT_TOKEN_FILE_GRACE},
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// OAuth bearer token of the listening account
    #[clap(long, env = "NOWSYNC_TOKEN", hide_env_values = true, required_unless_present = "token_file")]
    token: Option<String>,
    /// File holding the bearer token. Re-read before every poll, so an
    /// external helper can refresh it.
    #[clap(long, env = "NOWSYNC_TOKEN_FILE", conflicts_with = "token")]
    token_file: Option<PathBuf>,
    /// Seconds the token file may stay missing or empty before giving up
    #[clap(long, env = "NOWSYNC_TOKEN_FILE_GRACE_SECS", default_value_t = DEFAULT_TOKEN_FILE_GRACE.as_secs())]
    token_file_grace_secs: u64,
    /// Currently-playing endpoint to poll
    #[clap(long, env = "NOWSYNC_ENDPOINT", default_value = CURRENTLY_PLAYING_URL)]
    pub endpoint: String,
    /// Milliseconds between two polls
    #[clap(long, env = "NOWSYNC_POLL_INTERVAL_MS", default_value_t = 5000)]
    poll_interval_ms: u64,
    /// Milliseconds between two local progress ticks
    #[clap(long, env = "NOWSYNC_TICK_INTERVAL_MS", default_value_t = 1000)]
    tick_interval_ms: u64,
    /// Give up on a request after this many milliseconds
    #[clap(long, env = "NOWSYNC_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    request_timeout_ms: u64,
    /// Polls allowed in flight at once
    #[clap(long, env = "NOWSYNC_MAX_IN_FLIGHT", default_value_t = 4)]
    max_in_flight: usize,
    /// Longest wait between polls while the endpoint keeps failing
    #[clap(long, env = "NOWSYNC_MAX_BACKOFF_SECS", default_value_t = 60)]
    max_backoff_secs: u64,
    /// Output format written to stdout
    #[clap(long, short, value_enum, default_value_t = OutputFormat::Waybar)]
    pub format: OutputFormat,
    /// File to write the log to. If not specified, logs will be written to stderr.
    #[clap(long, short)]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Build the tracing subscriber using parameters from the command line arguments
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be created.
    pub fn init_tracing_subscriber(&self) -> Result<()> {
        let builder = tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env());

        match self.log_file.as_ref() {
            None => builder.with_writer(io::stderr).init(),
            Some(f) => {
                let file = File::create(f)
                    .with_context(|| format!("Failed to create log file {}", f.display()))?;
                builder.with_writer(Mutex::new(file)).init();
            }
        }
        Ok(())
    }

    /// The token provider selected by `--token` or `--token-file`
    ///
    /// # Errors
    ///
    /// Returns an error if neither is given or the static token is blank.
    pub fn token_source(&self) -> Result<TokenSource> {
        if let Some(path) = &self.token_file {
            let file = TokenFile::new(path).with_grace(Duration::from_secs(self.token_file_grace_secs));
            return Ok(TokenSource::File(file));
        }
        let token = self
            .token
            .as_deref()
            .context("Either --token or --token-file is required")?;
        let token = BearerToken::new(token).context("Bearer token is empty")?;
        Ok(TokenSource::Static(StaticToken::new(token)))
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            max_in_flight: self.max_in_flight.max(1),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}
