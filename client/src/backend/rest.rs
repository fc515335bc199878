//! REST binding for the hosted backend.
//!
//! Auth calls go to `/auth/v1/*`; table reads go to `/rest/v1/<table>` with
//! `column=eq.value` filters. Every request carries the project's `apikey`
//! header. Authenticated requests send the session token as a bearer token,
//! anonymous ones send the anon key so row-level security sees the `anon` role.

use std::sync::Arc;

use async_trait::async_trait;
use larder_common::{Identity, UserId};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::{AuthService, BackendError, QueryService};
use crate::config::Config;

/// Session tokens held for the signed-in account.
#[derive(Debug, Default)]
struct AuthState {
    access_token: Option<String>,
    identity: Option<Identity>,
}

/// Token response from `POST /auth/v1/token`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserResponse,
}

/// User object returned by the auth endpoints.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    email: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(r: UserResponse) -> Self {
        Self {
            id: UserId::new(r.id),
            email: r.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    is_blocked: Option<bool>,
}

/// HTTP client for the hosted auth and table endpoints.
#[derive(Clone)]
pub struct RestBackend {
    http: HttpClient,
    base: Url,
    anon_key: String,
    auth: Arc<RwLock<AuthState>>,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    /// Build a backend client from configuration.
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let http = HttpClient::builder()
            .timeout(config.http_timeout)
            .build()?;
        Self::with_client(http, &config.backend_url, &config.anon_key)
    }

    /// Build a backend client around an existing HTTP client.
    pub fn with_client(
        http: HttpClient,
        backend_url: &str,
        anon_key: &str,
    ) -> Result<Self, BackendError> {
        let base = Url::parse(&format!("{}/", backend_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base,
            anon_key: anon_key.to_string(),
            auth: Arc::new(RwLock::new(AuthState::default())),
        })
    }

    /// Adopt a previously issued access token, e.g. one persisted by the host.
    ///
    /// The token is checked on the next [`AuthService::current_identity`] call.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        let mut auth = self.auth.write().await;
        auth.access_token = Some(token.into());
        auth.identity = None;
    }

    /// The current access token, if signed in.
    pub async fn access_token(&self) -> Option<String> {
        self.auth.read().await.access_token.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base.join(path)?)
    }

    fn table(
        &self,
        table: &str,
        select: &str,
        filters: &[(&str, String)],
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&format!("rest/v1/{table}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", select);
            for (column, value) in filters {
                pairs.append_pair(column, &format!("eq.{value}"));
            }
        }
        Ok(url)
    }

    /// Attach the project key and the best available bearer token.
    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .auth
            .read()
            .await
            .access_token
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
    }

    async fn rows<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, BackendError> {
        let response = self
            .authorize(self.http.get(url))
            .await
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                error!("Table request failed: {}", e);
                BackendError::from(e)
            })?;
        decode(check(response).await?).await
    }
}

/// Turn a non-success response into a classified error.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "Backend request rejected");
    Err(BackendError::from_status(status.as_u16(), body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl AuthService for RestBackend {
    #[tracing::instrument(skip(self))]
    async fn current_identity(&self) -> Result<Option<Identity>, BackendError> {
        let token = {
            let auth = self.auth.read().await;
            if let Some(identity) = &auth.identity {
                return Ok(Some(identity.clone()));
            }
            match &auth.access_token {
                Some(token) => token.clone(),
                None => return Ok(None),
            }
        };

        let response = self
            .http
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            warn!("Stored session was rejected, clearing it");
            let mut auth = self.auth.write().await;
            *auth = AuthState::default();
            return Ok(None);
        }

        let user: UserResponse = decode(check(response).await?).await?;
        let identity = Identity::from(user);

        let mut auth = self.auth.write().await;
        // A concurrent sign-out wins over this restore.
        if auth.access_token.as_deref() == Some(token.as_str()) {
            auth.identity = Some(identity.clone());
        }
        Ok(Some(identity))
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        info!("Attempting sign-in");

        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| {
                error!("Sign-in request failed: {}", e);
                BackendError::from(e)
            })?;

        if matches!(response.status().as_u16(), 400 | 401) {
            return Err(BackendError::InvalidCredentials);
        }

        let tokens: TokenResponse = decode(check(response).await?).await?;
        let identity = Identity::from(tokens.user);

        {
            let mut auth = self.auth.write().await;
            auth.access_token = Some(tokens.access_token);
            auth.identity = Some(identity.clone());
        }

        info!(user_id = %identity.id, "Signed in");
        Ok(identity)
    }

    #[tracing::instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = {
            let mut auth = self.auth.write().await;
            std::mem::take(&mut *auth).access_token
        };

        // Invalidate remotely (best effort); local state is already gone.
        if let Some(token) = token {
            let result = self
                .http
                .post(self.endpoint("auth/v1/logout")?)
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = response.status().as_u16(), "Remote sign-out rejected");
                }
                Err(e) => warn!("Remote sign-out failed: {}", e),
                Ok(_) => {}
            }
        }

        info!("Signed out");
        Ok(())
    }
}

#[async_trait]
impl QueryService for RestBackend {
    #[tracing::instrument(skip(self))]
    async fn has_role(&self, user: UserId, role: &str) -> Result<bool, BackendError> {
        let url = self.table(
            "user_roles",
            "role",
            &[("user_id", user.to_string()), ("role", role.to_string())],
        )?;
        let rows: Vec<IgnoredAny> = self.rows(url).await?;
        debug!(user_id = %user, role, found = !rows.is_empty(), "Role lookup");
        Ok(!rows.is_empty())
    }

    #[tracing::instrument(skip(self))]
    async fn is_blocked(&self, user: UserId) -> Result<Option<bool>, BackendError> {
        let url = self.table("profiles", "is_blocked", &[("id", user.to_string())])?;
        let rows: Vec<ProfileRow> = self.rows(url).await?;
        // A NULL flag on an existing profile means the account was never blocked.
        Ok(rows.into_iter().next().map(|row| row.is_blocked.unwrap_or(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RestBackend {
        RestBackend::with_client(HttpClient::new(), "https://example.supabase.co/", "anon")
            .unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base() {
        let url = backend().endpoint("auth/v1/user").unwrap();
        assert_eq!(url.as_str(), "https://example.supabase.co/auth/v1/user");
    }

    #[test]
    fn test_table_url_uses_eq_filters() {
        let id: UserId = "6f1c2f8e-0d5a-4a7e-9a53-3c4b9f0d2e11".parse().unwrap();
        let url = backend()
            .table("profiles", "is_blocked", &[("id", id.to_string())])
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/profiles");
        assert_eq!(url.query(), Some(format!("select=is_blocked&id=eq.{id}").as_str()));
    }

    #[tokio::test]
    async fn test_current_identity_without_token_is_none() {
        let identity = backend().current_identity().await.unwrap();
        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_set_access_token_is_visible() {
        let backend = backend();
        backend.set_access_token("abc").await;
        assert_eq!(backend.access_token().await.as_deref(), Some("abc"));
    }
}
