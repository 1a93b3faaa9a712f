//! Bearer-token sources for the HTTP collaborators and the session channel.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Supplies the opaque bearer token, read fresh on every use.
pub trait CredentialSource: Send + Sync {
    /// Current token, `None` when the user is not logged in.
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, e.g. from an environment override.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.trim().is_empty())
    }
}

/// Token persisted in a file on the local machine.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored token; missing or blank files yield `None`.
    pub fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Persists `token`, creating parent directories as needed.
    pub fn save(&self, token: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token.trim())?;
        debug!(path = %self.path.display(), "Token saved");
        Ok(())
    }

    /// Removes the stored token. Returns `true` if a file was deleted.
    pub fn clear(&self) -> Result<bool, std::io::Error> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl CredentialSource for TokenFile {
    fn bearer_token(&self) -> Option<String> {
        self.load()
    }
}
