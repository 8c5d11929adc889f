//! Bearer tokens attached to model requests.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::AuthConfig;
use crate::error::CredentialError;

/// Tokens within this margin of expiry are treated as expired.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);
const DEFAULT_LIFETIME_SECS: u64 = 3600;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The token to send, or `None` to fall back to the transport's own key.
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>, CredentialError> {
        Ok(Some(self.0.clone()))
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Single cached token shared by concurrent callers.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token while fresh, otherwise awaits `fetch` and caches the result.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, CredentialError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedToken, CredentialError>>,
    {
        let mut slot = self.slot.lock().await;
        let now = Instant::now();
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > now + EXPIRY_MARGIN {
                info!("using cached access token");
                return Ok(cached.access_token.clone());
            }
        }

        let issued = fetch().await?;
        let access_token = issued.access_token.ok_or(CredentialError::MissingToken)?;
        let lifetime = Duration::from_secs(issued.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS));
        *slot = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: now + lifetime,
        });
        info!(expires_in = lifetime.as_secs(), "fetched new access token");
        Ok(access_token)
    }
}

/// Client-credentials when a token URL is configured, otherwise none.
pub fn from_config(auth: Option<&AuthConfig>) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    match auth {
        #[cfg(feature = "http")]
        Some(auth) if !auth.token_url.is_empty() => {
            Ok(Arc::new(ClientCredentialsProvider::new(auth.clone())?))
        }
        _ => Ok(Arc::new(NoCredentials)),
    }
}

#[cfg(feature = "http")]
pub use http::ClientCredentialsProvider;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{CredentialProvider, IssuedToken, TokenCache};
    use crate::config::AuthConfig;
    use crate::error::CredentialError;

    /// OAuth2 client-credentials grant with a cached token.
    pub struct ClientCredentialsProvider {
        http: reqwest::Client,
        config: AuthConfig,
        cache: TokenCache,
    }

    impl ClientCredentialsProvider {
        pub fn new(config: AuthConfig) -> Result<Self, CredentialError> {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|err| CredentialError::Request(err.to_string()))?;
            Ok(Self {
                http,
                config,
                cache: TokenCache::new(),
            })
        }

        async fn fetch(&self) -> Result<IssuedToken, CredentialError> {
            let mut form = vec![("grant_type", "client_credentials")];
            if let Some(scope) = self.config.scope.as_deref() {
                form.push(("scope", scope));
            }
            let resp = self
                .http
                .post(&self.config.token_url)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&form)
                .send()
                .await
                .map_err(|err| CredentialError::Request(err.to_string()))?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(CredentialError::Rejected { status, body });
            }
            resp.json::<IssuedToken>()
                .await
                .map_err(|err| CredentialError::Request(err.to_string()))
        }
    }

    #[async_trait]
    impl CredentialProvider for ClientCredentialsProvider {
        async fn bearer_token(&self) -> Result<Option<String>, CredentialError> {
            self.cache.get_or_fetch(|| self.fetch()).await.map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn issued(token: &str, expires_in: u64) -> IssuedToken {
        IssuedToken {
            access_token: Some(token.into()),
            expires_in: Some(expires_in),
        }
    }

    #[tokio::test]
    async fn reuses_unexpired_token() {
        let cache = TokenCache::new();
        let fetches = AtomicUsize::new(0);
        for _ in 0..3 {
            let token = cache
                .get_or_fetch(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(issued("abc", 3600))
                })
                .await
                .unwrap();
            assert_eq!(token, "abc");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_tokens_inside_the_margin() {
        let cache = TokenCache::new();
        let first = cache.get_or_fetch(|| async { Ok(issued("old", 5)) }).await.unwrap();
        let second = cache.get_or_fetch(|| async { Ok(issued("new", 3600)) }).await.unwrap();
        assert_eq!(first, "old");
        assert_eq!(second, "new");
    }

    #[tokio::test]
    async fn missing_access_token_is_an_error() {
        let cache = TokenCache::new();
        let err = cache
            .get_or_fetch(|| async {
                Ok(IssuedToken {
                    access_token: None,
                    expires_in: None,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err, CredentialError::MissingToken);
    }

    #[tokio::test]
    async fn unconfigured_auth_sends_no_token() {
        let provider = from_config(None).unwrap();
        assert_eq!(provider.bearer_token().await.unwrap(), None);
        let blank = AuthConfig::default();
        let provider = from_config(Some(&blank)).unwrap();
        assert_eq!(provider.bearer_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn static_and_empty_providers() {
        assert_eq!(NoCredentials.bearer_token().await.unwrap(), None);
        assert_eq!(
            StaticToken("t".into()).bearer_token().await.unwrap(),
            Some("t".into())
        );
    }
}
