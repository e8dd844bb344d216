//! Credential storage and the token gate.
//!
//! Every command that talks to Xero first obtains an [`Authorized`] value from
//! [`require_token`]. The sync entry points take that value as a parameter,
//! so no handler logic can run for a session without a stored credential.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::db::{self, Pool};

/// OAuth2 token as issued by the identity service. Unknown fields are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Absolute expiry, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl OAuth2Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| (now.timestamp() as f64) >= at)
    }

    /// Fill `expires_at` from `expires_in` relative to `now`.
    fn stamp(mut self, now: DateTime<Utc>) -> Self {
        if let Some(secs) = self.expires_in {
            self.expires_at = Some((now.timestamp() + secs) as f64);
        }
        self
    }

    fn stamp_if_missing(self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_some() {
            self
        } else {
            self.stamp(now)
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session '{session}' has no Xero token; import one with `token import`")]
    NotAuthenticated { session: String },
    #[error("credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Keyed token storage, injected wherever a token is read or written.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<OAuth2Token>>;

    async fn put(&self, session_id: &str, token: &OAuth2Token) -> Result<()>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Tokens persisted in the local SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: Pool,
}

impl SqliteCredentialStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, session_id: &str) -> Result<Option<OAuth2Token>> {
        match db::get_token(&self.pool, session_id).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("stored token is not valid JSON")?,
            )),
            None => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, token: &OAuth2Token) -> Result<()> {
        let raw = serde_json::to_string(token)?;
        db::put_token(&self.pool, session_id, &raw).await
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        db::delete_token(&self.pool, session_id).await
    }
}

/// Process-local store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<HashMap<String, OAuth2Token>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, session_id: &str) -> Result<Option<OAuth2Token>> {
        Ok(self.tokens.lock().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, token: &OAuth2Token) -> Result<()> {
        self.tokens
            .lock()
            .await
            .insert(session_id.to_string(), token.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.tokens.lock().await.remove(session_id);
        Ok(())
    }
}

/// Proof that a session holds a token. Only [`require_token`] and
/// [`refresh_session`] create one.
#[derive(Debug, Clone)]
pub struct Authorized {
    session_id: String,
    token: OAuth2Token,
}

impl Authorized {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn token(&self) -> &OAuth2Token {
        &self.token
    }

    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }
}

/// Gate: reject the request before any handler logic when the session has no
/// token.
#[instrument(skip(store))]
pub async fn require_token(
    store: &dyn CredentialStore,
    session_id: &str,
) -> Result<Authorized, AuthError> {
    match store.get(session_id).await? {
        Some(token) => Ok(Authorized {
            session_id: session_id.to_string(),
            token,
        }),
        None => Err(AuthError::NotAuthenticated {
            session: session_id.to_string(),
        }),
    }
}

/// Client for the identity service's token endpoint.
#[derive(Clone)]
pub struct IdentityClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for IdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl IdentityClient {
    pub fn new(base_url: Url, client_id: String, client_secret: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("xero-archiver/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            client_id,
            client_secret,
        })
    }

    pub fn refresh_request(&self, refresh_token: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("connect/token")
            .context("invalid identity base URL")?;
        self.http
            .post(endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .build()
            .context("failed to build token refresh request")
    }

    /// Exchange the refresh token of `token` for a new token.
    pub async fn refresh(&self, token: &OAuth2Token) -> Result<OAuth2Token> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("token has no refresh_token"))?;
        let request = self.refresh_request(refresh_token)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach identity service")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("token refresh failed {}: {}", status, body));
        }
        let fresh: OAuth2Token = res.json().await.context("invalid token response")?;
        Ok(fresh.stamp(Utc::now()))
    }
}

/// Refresh the session's token and store the result.
pub async fn refresh_session(
    store: &dyn CredentialStore,
    identity: &IdentityClient,
    auth: &Authorized,
) -> Result<Authorized> {
    let fresh = identity.refresh(&auth.token).await?;
    store.put(&auth.session_id, &fresh).await?;
    info!(session = %auth.session_id, "token refreshed");
    Ok(Authorized {
        session_id: auth.session_id.clone(),
        token: fresh,
    })
}

/// Read a token from a JSON file into the store.
pub async fn import_token(store: &dyn CredentialStore, session_id: &str, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let token: OAuth2Token =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a token", path.display()))?;
    store.put(session_id, &token.stamp_if_missing(Utc::now())).await?;
    info!(session = session_id, "token imported");
    Ok(())
}

/// Write the session's token to a JSON file.
pub async fn export_token(auth: &Authorized, path: &Path) -> Result<()> {
    let raw = serde_json::to_string_pretty(&auth.token)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
