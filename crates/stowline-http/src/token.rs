//! Access token sources.

use async_trait::async_trait;
use stowline_transfer::RequestError;

/// Supplies the bearer token attached to every request.
///
/// Minting and refreshing tokens is left to the implementation. Returning
/// `None` sends the request without an `Authorization` header.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Current access token.
    async fn token(&self) -> Result<Option<String>, RequestError>;
}

/// A fixed token, or none at all.
#[derive(Clone, Default)]
pub struct StaticTokenSource {
    token: Option<String>,
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StaticTokenSource {
    /// Always hand out `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Send unauthenticated requests.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<Option<String>, RequestError> {
        Ok(self.token.clone())
    }
}
