//! CLI subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::{Context, bail};
use keyhole_core::config::user_config_path;
use keyhole_core::{
    ConfigOverrides, KeyholeConfig, OidcVerifier, RandomTokenSource, SystemBrowser, TokenInfo,
    authenticate_with_timeout, load_config, validate_access_token,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config_file: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Login {
            token,
            client_id,
            port,
            timeout,
            no_validate,
        } => {
            let overrides = ConfigOverrides {
                client_id,
                redirect_port: port,
                login_timeout_secs: timeout,
            };
            let config = load_config(config_file, Some(&overrides))
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

            let access_token = match token {
                Some(value) => parse_token_flag(&value)?,
                None => browser_login(&config).await?,
            };

            if !no_validate {
                validate(&config, &access_token).await?;
            }
            println!("{access_token}");
            Ok(())
        }
        Commands::Validate { token } => {
            let config = load_config(config_file, None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            validate(&config, &parse_token_flag(&token)?).await
        }
        Commands::Config { action } => handle_config(action, config_file),
    }
}

/// Accept a token given as `oauth:<token>` or `<token>`.
fn parse_token_flag(value: &str) -> anyhow::Result<String> {
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [_, token] | [token] => Ok((*token).to_string()),
        _ => bail!("failed to parse token"),
    }
}

async fn browser_login(config: &KeyholeConfig) -> anyhow::Result<String> {
    let verifier = OidcVerifier::discover(&config.issuer, &config.client_id)
        .await
        .with_context(|| format!("Failed to load signing keys for {}", config.issuer))?;

    let token = authenticate_with_timeout(
        &config.provider_config(),
        Arc::new(verifier),
        &RandomTokenSource,
        &SystemBrowser,
        config.login_timeout(),
    )
    .await?;
    Ok(token)
}

async fn validate(config: &KeyholeConfig, access_token: &str) -> anyhow::Result<()> {
    let info = validate_access_token(&reqwest::Client::new(), &config.validate_url, access_token)
        .await?;
    debug!(scopes = ?info.scopes, expires_in = ?info.expires_in, "Access token accepted");
    eprintln!("{}", validation_summary(&info));
    Ok(())
}

/// Line shown on stderr once the provider accepts a token.
fn validation_summary(info: &TokenInfo) -> String {
    match &info.login {
        Some(login) => format!("Access token is valid for {login}"),
        None => "Access token is valid".to_string(),
    }
}

fn handle_config(action: ConfigAction, config_file: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_file
                .map(Path::to_path_buf)
                .or_else(user_config_path)
                .context("Could not determine a config directory")?;
            if path.exists() {
                println!("Config already exists at {}", path.display());
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let body = toml::to_string_pretty(&KeyholeConfig::default())?;
            std::fs::write(&path, body)?;
            println!("Created {}. Set client_id before logging in.", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(config_file, None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
