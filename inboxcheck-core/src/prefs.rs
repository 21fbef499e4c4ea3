//! Persisted user preferences.
//!
//! Holds the last email address used for a test so history and
//! statistics lookups can be pre-filled on the next run.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::persistence::{atomic_write_json, load_json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

/// JSON-file backed store for [`Preferences`].
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform data directory, if one can be determined.
    pub fn default_location() -> Option<Self> {
        directories::ProjectDirs::from("dev", "inboxcheck", "inboxcheck")
            .map(|dirs| Self::new(dirs.data_dir().join("preferences.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load preferences; a missing file yields defaults.
    pub fn load(&self) -> io::Result<Preferences> {
        Ok(load_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, prefs: &Preferences) -> io::Result<()> {
        atomic_write_json(&self.path, prefs)
    }

    /// The remembered email, if any.
    pub fn last_email(&self) -> io::Result<Option<String>> {
        Ok(self.load()?.user_email)
    }

    /// Remember `email` for later lookups. Blank input is ignored.
    pub fn remember_email(&self, email: &str) -> io::Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Ok(());
        }
        let mut prefs = self.load()?;
        if prefs.user_email.as_deref() == Some(email) {
            return Ok(());
        }
        prefs.user_email = Some(email.to_string());
        debug!(path = %self.path.display(), "Saving remembered email");
        self.save(&prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PreferencesStore {
        PreferencesStore::new(dir.path().join("preferences.json"))
    }

    #[test]
    fn test_load_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load().unwrap(), Preferences::default());
        assert_eq!(store(&dir).last_email().unwrap(), None);
    }

    #[test]
    fn test_remember_email_persists() {
        let dir = TempDir::new().unwrap();
        store(&dir).remember_email(" a@b.com ").unwrap();
        // A fresh store on the same path sees the saved value.
        assert_eq!(
            store(&dir).last_email().unwrap().as_deref(),
            Some("a@b.com")
        );
    }

    #[test]
    fn test_remember_email_ignores_blank() {
        let dir = TempDir::new().unwrap();
        let prefs = store(&dir);
        prefs.remember_email("a@b.com").unwrap();
        prefs.remember_email("   ").unwrap();
        assert_eq!(prefs.last_email().unwrap().as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_remember_email_overwrites() {
        let dir = TempDir::new().unwrap();
        let prefs = store(&dir);
        prefs.remember_email("a@b.com").unwrap();
        prefs.remember_email("c@d.com").unwrap();
        assert_eq!(prefs.last_email().unwrap().as_deref(), Some("c@d.com"));
    }
}
