//! Bearer tokens and the collaborators that hand them out

use std::{
    cell::Cell,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::time::Instant;

/// An access token for the playback endpoint. Never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a token, returning `None` if it's empty or only whitespace.
    #[must_use]
    pub fn new(token: impl AsRef<str>) -> Option<Self> {
        let token = token.as_ref().trim();
        (!token.is_empty()).then(|| Self(token.to_owned()))
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BearerToken").field(&"<redacted>").finish()
    }
}

/// Answer of a [`TokenProvider`] for one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// Poll with this token
    Ready(BearerToken),
    /// No token right now, skip this poll and ask again next time
    Unavailable,
    /// The session is over
    Revoked,
}

/// Supplies the bearer token used for each poll.
///
/// The engine never performs the OAuth dance itself. It asks for a token
/// before every poll and reports rejections back.
pub trait TokenProvider {
    fn bearer_token(&self) -> impl Future<Output = TokenLookup>;
    /// Called when the endpoint rejected the last token.
    fn on_unauthorized(&self) -> impl Future<Output = ()>;
}

/// A token that was handed to us once and never changes.
#[derive(Debug, Clone)]
pub struct StaticToken(BearerToken);

impl StaticToken {
    #[must_use]
    pub const fn new(token: BearerToken) -> Self {
        Self(token)
    }
}

impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> TokenLookup {
        TokenLookup::Ready(self.0.clone())
    }
    async fn on_unauthorized(&self) {
        tracing::warn!("Static bearer token was rejected. Restart with a fresh token to re-authenticate");
    }
}

/// How long a token file may stay missing or empty before the session ends
pub const DEFAULT_TOKEN_FILE_GRACE: Duration = Duration::from_secs(300);

/// A token kept in a file that an external helper rewrites on refresh.
///
/// The file is read again before every poll. Helpers usually truncate or
/// rename the file while refreshing, so a missing or empty file only skips
/// polls. It ends the session once it stays that way for longer than the
/// grace period.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
    grace: Duration,
    unavailable_since: Cell<Option<Instant>>,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            grace: DEFAULT_TOKEN_FILE_GRACE,
            unavailable_since: Cell::new(None),
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Option<BearerToken> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => BearerToken::new(contents),
            Err(e) => {
                tracing::debug!(?e, path = %self.path.display(), "Token file is unreadable");
                None
            }
        }
    }
}

impl TokenProvider for TokenFile {
    async fn bearer_token(&self) -> TokenLookup {
        if let Some(token) = self.read().await {
            self.unavailable_since.set(None);
            return TokenLookup::Ready(token);
        }
        let since = self.unavailable_since.get().unwrap_or_else(|| {
            let now = Instant::now();
            self.unavailable_since.set(Some(now));
            now
        });
        if since.elapsed() > self.grace {
            tracing::info!(path = %self.path.display(), grace = ?self.grace, "Token file stayed empty past the grace period");
            TokenLookup::Revoked
        } else {
            tracing::warn!(path = %self.path.display(), "Token file is missing or empty, skipping poll");
            TokenLookup::Unavailable
        }
    }
    async fn on_unauthorized(&self) {
        tracing::warn!(path = %self.path.display(), "Bearer token was rejected. Waiting for the token file to be rewritten");
    }
}

/// The token provider picked on the command line.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(StaticToken),
    File(TokenFile),
}

impl TokenProvider for TokenSource {
    async fn bearer_token(&self) -> TokenLookup {
        match self {
            Self::Static(t) => t.bearer_token().await,
            Self::File(t) => t.bearer_token().await,
        }
    }
    async fn on_unauthorized(&self) {
        match self {
            Self::Static(t) => t.on_unauthorized().await,
            Self::File(t) => t.on_unauthorized().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn empty_tokens_are_rejected() {
        assert!(BearerToken::new("").is_none());
        assert!(BearerToken::new("  \n").is_none());
        assert_eq!(BearerToken::new(" abc\n").unwrap().secret(), "abc");
    }

    #[test]
    fn debug_output_hides_secret() {
        let token = BearerToken::new("very-secret").unwrap();
        assert!(!format!("{token:?}").contains("very-secret"));
    }

    fn ready(lookup: TokenLookup) -> String {
        match lookup {
            TokenLookup::Ready(token) => token.secret().to_owned(),
            other => panic!("expected a token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_file_is_reread_on_every_call() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        let provider = TokenFile::new(file.path());
        assert_eq!(ready(provider.bearer_token().await), "first");

        std::fs::write(file.path(), "second").unwrap();
        assert_eq!(ready(provider.bearer_token().await), "second");

        std::fs::write(file.path(), "").unwrap();
        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);

        std::fs::write(file.path(), "third").unwrap();
        assert_eq!(ready(provider.bearer_token().await), "third");
    }

    #[tokio::test]
    async fn missing_token_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TokenFile::new(dir.path().join("token"));
        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn token_file_is_revoked_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let provider = TokenFile::new(&path).with_grace(Duration::from_secs(10));

        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);

        // A token showing up restarts the grace period
        std::fs::write(&path, "token").unwrap();
        assert_eq!(ready(provider.bearer_token().await), "token");
        std::fs::write(&path, "").unwrap();
        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(provider.bearer_token().await, TokenLookup::Unavailable);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(provider.bearer_token().await, TokenLookup::Revoked);
    }

    #[tokio::test]
    async fn static_token_never_changes() {
        let provider = TokenSource::Static(StaticToken::new(BearerToken::new("abc").unwrap()));
        provider.on_unauthorized().await;
        assert_eq!(ready(provider.bearer_token().await), "abc");
    }
}
