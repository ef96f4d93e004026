// Token file persistence
// One JSON document holding a session per controller URL

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::store::TargetContext;
use super::types::Credential;
use crate::error::Result;

/// What is remembered about a controller between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub credential: Credential,
    #[serde(default)]
    pub target: TargetContext,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenDocument {
    #[serde(default)]
    sessions: BTreeMap<String, StoredSession>,
}

/// Token file on disk, `~/.cfc/token.json` by default
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.cfc/token.json`, or `None` when the home directory is unknown
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".cfc").join("token.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TokenDocument> {
        if !self.path.exists() {
            return Ok(TokenDocument::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;
        let document = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;
        Ok(document)
    }

    fn write(&self, document: &TokenDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(document).context("Failed to serialize token file")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict token file: {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Session saved for `controller_url`, if any
    pub fn load(&self, controller_url: &str) -> Result<Option<StoredSession>> {
        let mut document = self.read()?;
        Ok(document.sessions.remove(controller_key(controller_url)))
    }

    pub fn save(&self, controller_url: &str, session: StoredSession) -> Result<()> {
        let mut document = self.read()?;
        document
            .sessions
            .insert(controller_key(controller_url).to_string(), session);
        self.write(&document)?;
        tracing::debug!(path = %self.path.display(), controller = controller_url, "Saved session");
        Ok(())
    }

    /// Forget the session for `controller_url`; true if one was stored
    pub fn remove(&self, controller_url: &str) -> Result<bool> {
        let mut document = self.read()?;
        let removed = document.sessions.remove(controller_key(controller_url)).is_some();
        if removed {
            self.write(&document)?;
        }
        Ok(removed)
    }
}

fn controller_key(controller_url: &str) -> &str {
    controller_url.trim_end_matches('/')
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloudSpace;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("nested").join("token.json"));

        assert!(file.load("https://api.example.com").unwrap().is_none());

        let session = StoredSession {
            credential: Credential::bearer("tok").with_refresh_token("ref"),
            target: TargetContext::for_space(CloudSpace::new("space-1", "dev")),
        };
        file.save("https://api.example.com/", session.clone()).unwrap();

        assert_eq!(file.load("https://api.example.com").unwrap(), Some(session));
        assert!(file.load("https://other.example.com").unwrap().is_none());
    }

    #[test]
    fn test_sessions_are_kept_per_controller() {
        let dir = TempDir::new().unwrap();
        let file = TokenFile::new(dir.path().join("token.json"));

        file.save("https://a", StoredSession { credential: Credential::bearer("a"), target: TargetContext::default() })
            .unwrap();
        file.save("https://b", StoredSession { credential: Credential::bearer("b"), target: TargetContext::default() })
            .unwrap();

        assert!(file.remove("https://a").unwrap());
        assert!(!file.remove("https://a").unwrap());
        assert_eq!(file.load("https://b").unwrap().unwrap().credential.access_token, "b");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();

        let err = TokenFile::new(path).load("https://a").unwrap_err();
        assert!(err.to_string().contains("Failed to parse token file"));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/tmp/token.json"), PathBuf::from("/tmp/token.json"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.cfc/token.json"), home.join(".cfc/token.json"));
            assert_eq!(expand_tilde("~"), home);
        }
    }
}
