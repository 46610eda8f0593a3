//! OAuth credentials from the key file.
//!
//! The file is a small JSON object. Only `oauth` is required; the client
//! id/secret pair is accepted so the same file can be shared with token
//! tooling:
//!
//! ```json
//! { "client_id_bot": "...", "client_secret_bot": "...", "oauth": "oauth:..." }
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct Keys {
    #[serde(rename = "client_id_bot", default)]
    pub client_id: Option<String>,
    #[serde(rename = "client_secret_bot", default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub oauth: String,
}

impl Keys {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid key file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        Self::parse(&json).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// The chat token, as sent in `PASS`.
    pub fn token(&self) -> Result<String> {
        let token = self.oauth.trim();
        if token.is_empty() {
            anyhow::bail!("Key file has no \"oauth\" token");
        }
        Ok(token.to_string())
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("oauth", &"<redacted>")
            .finish()
    }
}
