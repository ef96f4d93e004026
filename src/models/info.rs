use serde::{Deserialize, Serialize};

/// Controller discovery document served anonymously at `/v2/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    pub authorization_endpoint: String,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub logging_endpoint: Option<String>,
}

impl CloudInfo {
    /// OAuth token URL: `{authorization_endpoint}/oauth/token`
    pub fn oauth_token_url(&self) -> String {
        format!(
            "{}/oauth/token",
            self.authorization_endpoint.trim_end_matches('/')
        )
    }

    /// UAA base used for account management; falls back to the login server
    pub fn uaa_url(&self) -> &str {
        self.token_endpoint
            .as_deref()
            .unwrap_or(&self.authorization_endpoint)
            .trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let info: CloudInfo = serde_json::from_str(
            r#"{
                "name": "vcap",
                "build": "2222",
                "api_version": "2.54.0",
                "authorization_endpoint": "https://login.example.com/",
                "token_endpoint": "https://uaa.example.com"
            }"#,
        )
        .unwrap();

        assert_eq!(info.oauth_token_url(), "https://login.example.com/oauth/token");
        assert_eq!(info.uaa_url(), "https://uaa.example.com");
    }

    #[test]
    fn test_uaa_falls_back_to_login() {
        let info: CloudInfo =
            serde_json::from_str(r#"{"authorization_endpoint":"https://login.example.com"}"#)
                .unwrap();
        assert_eq!(info.uaa_url(), "https://login.example.com");
    }
}
