//! Configuration system for inboxcheck.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment. Configuration is read from
//! `~/.config/inboxcheck/config.toml` and/or `.inboxcheck/config.toml` in the
//! workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::TestCode;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxCheckConfig {
    pub service: ServiceConfig,
    pub polling: PollingConfig,
    /// Test inboxes users send their email to.
    pub inboxes: Vec<TestInbox>,
    /// Override for the preferences file location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_path: Option<PathBuf>,
}

impl Default for InboxCheckConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            polling: PollingConfig::default(),
            inboxes: default_inboxes(),
            preferences_path: None,
        }
    }
}

/// Remote test service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 30,
            user_agent: format!("inboxcheck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Status polling behaviour while detection runs.
///
/// A value of `0` disables the corresponding bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between status checks.
    pub interval_secs: u64,
    /// Maximum number of status checks before giving up.
    pub max_attempts: u32,
    /// Maximum seconds to wait for detection to finish.
    pub max_wait_secs: u64,
    /// Consecutive failed status checks tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            max_attempts: 150,
            max_wait_secs: 600,
            max_consecutive_failures: 10,
        }
    }
}

impl PollingConfig {
    /// No attempt, time, or failure bound.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            max_wait_secs: 0,
            max_consecutive_failures: 0,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs))
    }

    pub fn max_consecutive_failures(&self) -> Option<u32> {
        (self.max_consecutive_failures > 0).then_some(self.max_consecutive_failures)
    }
}

/// A mailbox the test email should be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInbox {
    pub email: String,
    pub provider: String,
}

impl TestInbox {
    /// `mailto:` link with the test subject pre-filled.
    pub fn mailto_link(&self, code: &TestCode) -> String {
        format!(
            "mailto:{}?subject={}",
            self.email,
            urlencoding::encode(&compose_subject(code))
        )
    }
}

/// Subject line the test email must carry so detection can find it.
pub fn compose_subject(code: &TestCode) -> String {
    format!("Email-{code}")
}

fn default_inboxes() -> Vec<TestInbox> {
    vec![
        TestInbox {
            email: "agmetestg1@gmail.com".to_string(),
            provider: "Gmail".to_string(),
        },
        TestInbox {
            email: "agmetestg02@gmail.com".to_string(),
            provider: "Gmail".to_string(),
        },
    ]
}

impl InboxCheckConfig {
    /// Reject configuration the client cannot run with.
    pub fn check(&self) -> Result<(), ConfigError> {
        let base = self.service.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::Invalid {
                message: "service.base_url is empty".into(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                message: format!("service.base_url ({base}) must start with http:// or https://"),
            });
        }
        Ok(())
    }

    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if nothing looks wrong.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.service.request_timeout_secs == 0 {
            warnings.push("service.request_timeout_secs is 0; requests never time out".into());
        }
        if self.polling.interval_secs == 0 {
            warnings.push("polling.interval_secs is 0; status will be polled back to back".into());
        }
        if self.polling.max_attempts == 0 && self.polling.max_wait_secs == 0 {
            warnings.push(
                "polling has neither max_attempts nor max_wait_secs; a stuck test polls forever"
                    .into(),
            );
        }
        if self.inboxes.is_empty() {
            warnings.push("no test inboxes configured".into());
        }
        warnings
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "inboxcheck", "inboxcheck")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".inboxcheck").join("config.toml")
}

/// Load configuration from all sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `INBOXCHECK_`)
/// 2. Workspace-local config (`.inboxcheck/config.toml`)
/// 3. User config (`~/.config/inboxcheck/config.toml`)
/// 4. Built-in defaults
pub fn load_config(workspace: Option<&Path>) -> Result<InboxCheckConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(InboxCheckConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // INBOXCHECK_SERVICE__BASE_URL, INBOXCHECK_POLLING__INTERVAL_SECS, etc.
    figment = figment.merge(Env::prefixed("INBOXCHECK_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
