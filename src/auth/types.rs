// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OAuth2 token set held by the credential store
///
/// Always replaced wholesale; never mutated field by field.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Credential {
    /// A bearer credential with no refresh token and no expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            token_type: default_token_type(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Value of the `Authorization` header for this credential
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Expires within `threshold` of now. No expiry means never.
    pub fn is_expiring_within(&self, threshold: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(exp) => exp <= Utc::now() + threshold,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(exp) => Utc::now() >= exp,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Keep a short prefix so tokens can be told apart in logs
pub(crate) fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}...", prefix)
}

/// What the session exchanges at the token endpoint on login
#[derive(Clone, PartialEq)]
pub enum LoginCredentials {
    /// Resource owner password grant
    Password { username: String, password: String },

    /// Client credentials grant
    Client {
        client_id: String,
        client_secret: String,
    },
}

impl LoginCredentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        LoginCredentials::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn client(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        LoginCredentials::Client {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Principal name for logs
    pub fn principal(&self) -> &str {
        match self {
            LoginCredentials::Password { username, .. } => username,
            LoginCredentials::Client { client_id, .. } => client_id,
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginCredentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            LoginCredentials::Client { client_id, .. } => f
                .debug_struct("Client")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// OAuth client the session authenticates as at the token endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self {
            client_id: "cf".to_string(),
            client_secret: String::new(),
        }
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a stored credential, keeping `previous_refresh` when the
    /// endpoint did not rotate the refresh token
    pub fn into_credential(self, previous_refresh: Option<String>) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            token_type: self.token_type.unwrap_or_else(default_token_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        let credential = Credential::bearer("abc.def.ghi");
        assert_eq!(credential.authorization_header(), "Bearer abc.def.ghi");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credential = Credential::bearer("secret-access-token").with_refresh_token("secret-refresh");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret-access-token"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("secret..."));

        let login = LoginCredentials::password("admin", "hunter2");
        let debug = format!("{:?}", login);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_expiry_checks() {
        let credential = Credential::bearer("t").with_expiry(Utc::now() + Duration::seconds(600));
        assert!(!credential.is_expiring_within(Duration::seconds(300)));
        assert!(credential.is_expiring_within(Duration::seconds(900)));
        assert!(!credential.is_expired());

        let expired = Credential::bearer("t").with_expiry(Utc::now() - Duration::seconds(60));
        assert!(expired.is_expired());

        let forever = Credential::bearer("t");
        assert!(!forever.is_expiring_within(Duration::days(365)));
        assert!(!forever.is_expired());
    }

    #[test]
    fn test_token_response_keeps_previous_refresh_token() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3600}"#).unwrap();
        let credential = response.into_credential(Some("old-refresh".to_string()));

        assert_eq!(credential.access_token, "new");
        assert_eq!(credential.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(credential.token_type, "bearer");
        assert!(credential.expires_at.is_some());
    }

    #[test]
    fn test_credential_serde_defaults() {
        let credential: Credential = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(credential, Credential::bearer("abc"));
    }
}
