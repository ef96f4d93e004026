use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::store::{CredentialStore, TargetContext};
use super::types::{Credential, LoginCredentials, OAuthClient, TokenResponse};
use crate::cache::InfoCache;
use crate::error::{ClientError, Result};
use crate::executor::{ApiResponse, Dispatcher};
use crate::models::CloudInfo;
use crate::request::{builders, RequestDescriptor};

/// Session manager
/// Owns the credential lifecycle: login, logout, refresh and direct overwrite
pub struct SessionManager {
    dispatcher: Arc<Dispatcher>,

    store: Arc<CredentialStore>,

    /// OAuth client used for HTTP Basic authentication at the token endpoint
    oauth_client: OAuthClient,

    /// What `login()` exchanges for a token
    login_credentials: RwLock<Option<LoginCredentials>>,

    /// Token endpoint override; discovered from `/v2/info` when `None`
    token_endpoint: Option<String>,

    info_cache: InfoCache,

    /// Refresh when the token expires within this window
    refresh_threshold: Duration,

    /// Serializes refresh grants
    refresh_lock: Mutex<()>,
}

/// Settings the session is built with
pub struct SessionSettings {
    pub oauth_client: OAuthClient,
    pub login_credentials: Option<LoginCredentials>,
    pub token_endpoint: Option<String>,
    pub refresh_threshold: Duration,
}

impl SessionManager {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<CredentialStore>,
        info_cache: InfoCache,
        settings: SessionSettings,
    ) -> Self {
        Self {
            dispatcher,
            store,
            oauth_client: settings.oauth_client,
            login_credentials: RwLock::new(settings.login_credentials),
            token_endpoint: settings
                .token_endpoint
                .map(|url| url.trim_end_matches('/').to_string()),
            info_cache,
            refresh_threshold: settings.refresh_threshold,
            refresh_lock: Mutex::new(()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Anonymous request outside the executor (info, token grants)
    fn send_unauthenticated(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let resolved = self.dispatcher.resolve(descriptor, &TargetContext::default())?;
        self.dispatcher.send(descriptor, resolved, None)
    }

    /// Controller info, served from cache while fresh
    pub fn info(&self) -> Result<CloudInfo> {
        let controller = self.dispatcher.base_url();
        if let Some(info) = self.info_cache.get(controller) {
            return Ok(info);
        }

        let info: CloudInfo = self.send_unauthenticated(&builders::info())?.json()?;
        self.info_cache.update(controller, info.clone());
        Ok(info)
    }

    /// OAuth token URL, configured or discovered
    pub fn token_url(&self) -> Result<String> {
        match &self.token_endpoint {
            Some(url) => Ok(format!("{}/oauth/token", url)),
            None => Ok(self.info()?.oauth_token_url()),
        }
    }

    pub fn set_login_credentials(&self, credentials: Option<LoginCredentials>) {
        *self.login_credentials.write() = credentials;
    }

    pub fn login_credentials(&self) -> Option<LoginCredentials> {
        self.login_credentials.read().clone()
    }

    /// Exchange the configured login credentials for a token
    ///
    /// The stored credential is replaced only on success.
    pub fn login(&self) -> Result<Credential> {
        let login = self.login_credentials().ok_or_else(|| {
            ClientError::Configuration("No login credentials configured".to_string())
        })?;

        let token_url = self.token_url()?;
        let descriptor = match &login {
            LoginCredentials::Password { username, password } => {
                builders::password_grant(&token_url, &self.oauth_client, username, password)
            }
            LoginCredentials::Client {
                client_id,
                client_secret,
            } => builders::client_credentials_grant(
                &token_url,
                &OAuthClient {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                },
            ),
        };

        tracing::info!(principal = login.principal(), "Logging in");
        let credential = self.request_token(&descriptor, None)?;
        self.store.replace_credential(Some(credential.clone()));

        tracing::info!(
            principal = login.principal(),
            expires_at = ?credential.expires_at,
            "Login successful"
        );
        Ok(credential)
    }

    /// Forget the credential; authenticated calls fail until the next login
    pub fn logout(&self) {
        if self.store.replace_credential(None).is_some() {
            tracing::info!("Logged out");
        }
    }

    /// Exchange the stored refresh token for a new credential
    pub fn refresh(&self) -> Result<Credential> {
        let _refresh = self.refresh_lock.lock();
        let current = self.store.credential().ok_or_else(|| {
            ClientError::Unauthenticated("No credential to refresh; call login() first".to_string())
        })?;
        self.refresh_locked(&current)
    }

    fn refresh_locked(&self, current: &Credential) -> Result<Credential> {
        let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
            ClientError::Configuration("Current credential has no refresh token".to_string())
        })?;

        tracing::debug!("Refreshing access token...");
        let token_url = self.token_url()?;
        let descriptor = builders::refresh_grant(&token_url, &self.oauth_client, refresh_token);
        let credential = self.request_token(&descriptor, current.refresh_token.clone())?;

        if !self
            .store
            .replace_credential_if(&current.access_token, credential.clone())
        {
            return Err(ClientError::Unauthenticated(
                "Credential was replaced while refreshing".to_string(),
            ));
        }

        tracing::info!(expires_at = ?credential.expires_at, "Access token refreshed");
        Ok(credential)
    }

    /// Post a grant; a 400 or 401 from the token endpoint is a rejected grant
    fn request_token(
        &self,
        descriptor: &RequestDescriptor,
        previous_refresh: Option<String>,
    ) -> Result<Credential> {
        let response = self
            .send_unauthenticated(descriptor)
            .map_err(|e| match e {
                ClientError::Remote {
                    operation,
                    status: 400,
                    message,
                } => ClientError::Authentication {
                    operation,
                    status: 400,
                    message,
                },
                other => other,
            })?;

        let token: TokenResponse = response.json()?;
        if token.access_token.is_empty() {
            return Err(ClientError::Decode {
                operation: response.operation().to_string(),
                message: "Token response does not contain access_token".to_string(),
            });
        }
        Ok(token.into_credential(previous_refresh))
    }

    pub fn credential(&self) -> Option<Credential> {
        self.store.credential()
    }

    /// Overwrite (or clear) the credential without contacting the token endpoint
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.store.replace_credential(credential);
    }

    /// Credential to authenticate `operation` with, refreshed if about to expire
    ///
    /// Fails with [`ClientError::Unauthenticated`] when none is stored. A failed
    /// proactive refresh falls back to the current token while it is still valid.
    pub fn bearer_credential(&self, operation: &str) -> Result<Credential> {
        let credential = self.store.credential().ok_or_else(|| {
            ClientError::Unauthenticated(format!(
                "{} requires a credential; call login() or set_credential() first",
                operation
            ))
        })?;

        if credential.refresh_token.is_none() || !credential.is_expiring_within(self.refresh_threshold) {
            return Ok(credential);
        }

        match self.refresh_expiring(&credential) {
            Ok(refreshed) => Ok(refreshed),
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);

                // Graceful degradation: if token isn't actually expired yet, use it
                if !credential.is_expired() {
                    tracing::warn!("Using existing token despite refresh failure (not yet expired)");
                    return Ok(credential);
                }
                Err(e)
            }
        }
    }

    fn refresh_expiring(&self, seen: &Credential) -> Result<Credential> {
        let _refresh = self.refresh_lock.lock();

        // Another thread may have refreshed while we waited
        let current = self.store.credential().ok_or_else(|| {
            ClientError::Unauthenticated("Logged out while waiting for token refresh".to_string())
        })?;
        if current.access_token != seen.access_token {
            return Ok(current);
        }

        self.refresh_locked(&current)
    }

    /// Advisory read of the target context
    pub fn target_context(&self) -> TargetContext {
        self.store.target()
    }

    /// Overwrite the target context, waiting for any running space-scoped operation
    pub fn set_target_context(&self, target: TargetContext) {
        let lease = self.store.lock_context();
        lease.replace(target);
    }
}
