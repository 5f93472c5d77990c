use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::info;

use crate::types::error::SyncError;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

/// Refresh scheduling and fetch sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between background refresh ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Number of inbox messages requested per pass
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
}

/// How display records are rendered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// POSIX-style locale identifier, e.g. `en_US` or `de_DE`
    #[serde(default = "default_locale")]
    pub locale: String,

    /// How message navigation URLs are built
    #[serde(default)]
    pub link: LinkMode,
}

/// Navigation URL strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LinkMode {
    /// Use the deep link supplied by the backend
    WebLink,
    /// Substitute the re-encoded conversation id into `{id}`
    Template { template: String },
}

/// Mail/directory backend connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; obtaining it is the auth collaborator's job
    pub access_token: Option<TokenSource>,
}

/// Token source - can be raw value or command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenSource {
    /// Raw token value
    Raw(String),
    /// Command to execute to get the token
    Command { command: String },
}

/// Outlook-style deep link; `{id}` receives the re-encoded conversation id
pub const DEFAULT_MESSAGE_URL_TEMPLATE: &str = "https://outlook.office.com/mail/inbox/id/{id}";

fn default_poll_interval() -> u64 {
    60
}

fn default_max_messages() -> u32 {
    25
}

fn default_locale() -> String {
    "en_US".to_string()
}

fn default_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            max_messages: default_max_messages(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            link: LinkMode::default(),
        }
    }
}

impl DisplayConfig {
    /// Parse the configured locale identifier
    pub fn locale(&self) -> Result<chrono::Locale, SyncError> {
        chrono::Locale::try_from(self.locale.as_str())
            .map_err(|_| SyncError::Config(format!("Unknown locale: {}", self.locale)))
    }
}

impl Default for LinkMode {
    fn default() -> Self {
        LinkMode::Template {
            template: DEFAULT_MESSAGE_URL_TEMPLATE.to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
        }
    }
}

impl TokenSource {
    /// Resolve the bearer token, running the command if configured
    pub fn resolve(&self) -> Result<String, SyncError> {
        match self {
            TokenSource::Raw(token) => Ok(token.clone()),
            TokenSource::Command { command } => {
                info!("Executing access token command");
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .map_err(|e| SyncError::Config(format!("Failed to run token command: {}", e)))?;

                if !output.status.success() {
                    return Err(SyncError::Config("Token command failed".to_string()));
                }

                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("inbox-sync").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("inbox-sync").join("config.toml"));
        paths.push(home_dir.join(".inbox-sync.rc"));
    }

    paths
}

/// Load configuration from the first default path that exists
pub fn load_config() -> Result<AppConfig, SyncError> {
    info!("Loading configuration from default paths");

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, SyncError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

    parse_config(&content)
}

/// Parse a TOML configuration document
pub fn parse_config(content: &str) -> Result<AppConfig, SyncError> {
    toml::from_str(content).map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.sync.poll_interval_seconds, 60);
        assert_eq!(config.sync.max_messages, 25);
        assert_eq!(config.display.locale, "en_US");
        assert!(matches!(config.display.link, LinkMode::Template { .. }));
        assert!(config.backend.access_token.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
            [sync]
            poll_interval_seconds = 30
            max_messages = 10

            [display]
            locale = "de_DE"
            link = { mode = "web_link" }

            [backend]
            base_url = "http://localhost:8080"
            access_token = { command = "echo token" }
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.display.link, LinkMode::WebLink);
        assert!(config.display.locale().is_ok());
        assert!(matches!(
            config.backend.access_token,
            Some(TokenSource::Command { .. })
        ));
    }

    #[test]
    fn test_unknown_locale() {
        let display = DisplayConfig {
            locale: "xx_NOPE".to_string(),
            link: LinkMode::WebLink,
        };
        assert!(matches!(display.locale(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_raw_token() {
        let source = TokenSource::Raw("abc".to_string());
        assert_eq!(source.resolve().unwrap(), "abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_token() {
        let config = parse_config(
            r#"
            [backend]
            access_token = { command = "echo '  tok-123  '" }
            "#,
        )
        .unwrap();
        let source = config.backend.access_token.unwrap();
        assert_eq!(source.resolve().unwrap(), "tok-123");

        let failing = TokenSource::Command {
            command: "exit 3".to_string(),
        };
        assert!(matches!(failing.resolve(), Err(SyncError::Config(_))));
    }
}
