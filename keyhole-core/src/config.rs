//! Configuration system for Keyhole.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment -> CLI overrides. The user config lives at
//! `~/.config/keyhole/config.toml` (or the platform equivalent).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuthError, ConfigError};

/// Default port of the registered redirect URI.
pub const DEFAULT_REDIRECT_PORT: u16 = 9999;

/// Identity provider settings needed to build the authorization URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Authorization endpoint URL.
    pub authorization_url: String,
    /// OAuth client ID.
    pub client_id: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider, e.g. `http://localhost:9999/`.
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// Port the loopback listener must bind, taken from the redirect URI.
    pub fn redirect_port(&self) -> Result<u16, AuthError> {
        let uri =
            url::Url::parse(&self.redirect_uri).map_err(|e| AuthError::MalformedEndpointConfig {
                message: format!("Invalid redirect URI '{}': {}", self.redirect_uri, e),
            })?;
        uri.port_or_known_default()
            .ok_or_else(|| AuthError::MalformedEndpointConfig {
                message: format!("Redirect URI '{}' has no port", self.redirect_uri),
            })
    }
}

/// Top-level configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyholeConfig {
    pub client_id: String,
    pub redirect_port: u16,
    /// OpenID issuer; discovery lives at `<issuer>/.well-known/openid-configuration`.
    pub issuer: String,
    pub authorization_url: String,
    /// Endpoint used to validate an access token after login.
    pub validate_url: String,
    pub scopes: Vec<String>,
    /// Upper bound on the wait for the browser redirect. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_timeout_secs: Option<u64>,
}

impl Default for KeyholeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            issuer: "https://id.twitch.tv/oauth2".to_string(),
            authorization_url: "https://id.twitch.tv/oauth2/authorize".to_string(),
            validate_url: "https://id.twitch.tv/oauth2/validate".to_string(),
            scopes: vec![
                "openid".to_string(),
                "chat:read".to_string(),
                "chat:edit".to_string(),
            ],
            login_timeout_secs: None,
        }
    }
}

impl KeyholeConfig {
    /// The redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.redirect_port)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            authorization_url: self.authorization_url.clone(),
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            redirect_uri: self.redirect_uri(),
        }
    }

    pub fn login_timeout(&self) -> Option<Duration> {
        self.login_timeout_secs.map(Duration::from_secs)
    }
}

/// Values set on the command line. Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_timeout_secs: Option<u64>,
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "keyhole", "keyhole")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (CLI flags)
/// 2. Environment variables (prefixed with `KEYHOLE_`)
/// 3. Explicit config file (`--config`)
/// 4. User config (`~/.config/keyhole/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<KeyholeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(KeyholeConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    // KEYHOLE_CLIENT_ID, KEYHOLE_REDIRECT_PORT, ...
    figment = figment.merge(Env::prefixed("KEYHOLE_"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: KeyholeConfig = figment.extract().map_err(Box::new)?;
    if config.client_id.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "client_id".to_string(),
        });
    }
    Ok(config)
}
