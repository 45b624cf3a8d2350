//! Authentication module
//!
//! DSIS sits behind APIM and needs two tokens on every data request:
//! an Azure AD token (client credentials flow) and a DSIS token obtained by
//! presenting the Azure AD token to the DSIS token endpoint (password grant).
//!
//! The query engine only sees the [`Authenticator`] trait; [`DsisAuth`] is the
//! production implementation.

use crate::config::DsisConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const DSIS_SITE_HEADER: &str = "dsis-site";
pub const DSIS_TOKEN_HEADER: &str = "dsis-token";
const DSIS_TOKEN_CLIENT_ID: &str = "dsis-data";
const DEFAULT_TOKEN_LIFETIME: u64 = 3600;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token request failed: {0}")]
    TokenRequestFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Token parse error: {0}")]
    ParseError(String),

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    #[error("Still unauthorized after refreshing tokens ({status}): {body}")]
    Unauthorized { status: u16, body: String },
}

/// Source of authenticated request headers
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Headers required on every data request
    async fn auth_headers(&self) -> Result<HeaderMap, AuthError>;

    /// Drop cached credentials and acquire new ones
    async fn refresh(&self) -> Result<(), AuthError>;
}

/// Token response from Azure AD or DSIS
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Cached token with expiry tracking
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        }
    }

    fn is_valid(&self) -> bool {
        // Consider token expired 60 seconds before actual expiry
        self.expires_at > Instant::now() + Duration::from_secs(60)
    }
}

#[derive(Debug, Default)]
struct TokenCache {
    aad: Option<CachedToken>,
    dsis: Option<CachedToken>,
}

impl TokenCache {
    fn valid_pair(&self) -> Option<(String, String)> {
        match (&self.aad, &self.dsis) {
            (Some(aad), Some(dsis)) if aad.is_valid() && dsis.is_valid() => {
                Some((aad.access_token.clone(), dsis.access_token.clone()))
            }
            _ => None,
        }
    }
}

/// Dual-token authentication for DSIS
#[derive(Debug)]
pub struct DsisAuth {
    config: DsisConfig,
    http_client: Client,
    token_cache: RwLock<TokenCache>,
}

impl DsisAuth {
    pub fn new(config: DsisConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: DsisConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
            token_cache: RwLock::new(TokenCache::default()),
        }
    }

    /// Azure AD token endpoint for the configured tenant
    fn aad_token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.config.authority())
    }

    /// Return a cached token pair or acquire a fresh one
    async fn tokens(&self) -> Result<(String, String), AuthError> {
        {
            let cache = self.token_cache.read().await;
            if let Some(pair) = cache.valid_pair() {
                tracing::debug!("Using cached tokens");
                return Ok(pair);
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(pair) = cache.valid_pair() {
            return Ok(pair);
        }

        let aad = self.acquire_aad_token().await?;
        let dsis = self.acquire_dsis_token(&aad.access_token).await?;
        let pair = (aad.access_token.clone(), dsis.access_token.clone());
        cache.aad = Some(aad);
        cache.dsis = Some(dsis);
        Ok(pair)
    }

    /// Acquire an Azure AD token with the client credentials flow
    async fn acquire_aad_token(&self) -> Result<CachedToken, AuthError> {
        tracing::info!(
            "Acquiring Azure AD token for tenant {}",
            self.config.credentials.tenant_id
        );

        let creds = &self.config.credentials;
        let scope = self.config.scope();
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http_client
            .post(self.aad_token_endpoint())
            .form(&params)
            .send()
            .await?;

        let token = Self::parse_token_response(response, "Azure AD").await?;
        let expires_in = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::info!("Azure AD token acquired, expires in {} seconds", expires_in);
        Ok(CachedToken::new(token.access_token, expires_in))
    }

    /// Exchange the Azure AD token for a DSIS token
    async fn acquire_dsis_token(&self, aad_token: &str) -> Result<CachedToken, AuthError> {
        tracing::info!("Acquiring DSIS token from {}", self.config.token_endpoint());

        let creds = &self.config.credentials;
        let params = [
            ("grant_type", "password"),
            ("client_id", DSIS_TOKEN_CLIENT_ID),
            ("username", creds.dsis_username.as_str()),
            ("password", creds.dsis_password.as_str()),
        ];

        let response = self
            .http_client
            .post(self.config.token_endpoint())
            .bearer_auth(aad_token)
            .header(DSIS_SITE_HEADER, &self.config.dsis_site)
            .header(SUBSCRIPTION_KEY_HEADER, &creds.subscription_key_dsauth)
            .form(&params)
            .send()
            .await?;

        let token = Self::parse_token_response(response, "DSIS").await?;
        let expires_in = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        tracing::info!("DSIS token acquired, expires in {} seconds", expires_in);
        Ok(CachedToken::new(token.access_token, expires_in))
    }

    async fn parse_token_response(
        response: reqwest::Response,
        issuer: &str,
    ) -> Result<TokenResponse, AuthError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("{} token request failed: {} - {}", issuer, status, body);
            return Err(AuthError::TokenRequestFailed(format!(
                "{} token: status {}, body: {}",
                issuer, status, body
            )));
        }

        response.json().await.map_err(|e| {
            AuthError::ParseError(format!("Failed to parse {} token response: {}", issuer, e))
        })
    }

    /// Clear both cached tokens
    pub async fn clear_cache(&self) {
        let mut cache = self.token_cache.write().await;
        *cache = TokenCache::default();
    }

    fn build_headers(&self, aad_token: &str, dsis_token: &str) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", aad_token), "Authorization")?,
        );
        headers.insert(
            HeaderName::from_static("ocp-apim-subscription-key"),
            header_value(
                &self.config.credentials.subscription_key_dsdata,
                SUBSCRIPTION_KEY_HEADER,
            )?,
        );
        headers.insert(
            HeaderName::from_static(DSIS_SITE_HEADER),
            header_value(&self.config.dsis_site, DSIS_SITE_HEADER)?,
        );
        headers.insert(
            HeaderName::from_static(DSIS_TOKEN_HEADER),
            header_value(dsis_token, DSIS_TOKEN_HEADER)?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl Authenticator for DsisAuth {
    async fn auth_headers(&self) -> Result<HeaderMap, AuthError> {
        let (aad, dsis) = self.tokens().await?;
        self.build_headers(&aad, &dsis)
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        tracing::info!("Refreshing Azure AD and DSIS tokens");
        self.clear_cache().await;
        self.tokens().await.map(|_| ())
    }
}

fn header_value(value: &str, name: &'static str) -> Result<HeaderValue, AuthError> {
    let mut value = HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeader(name))?;
    value.set_sensitive(true);
    Ok(value)
}
