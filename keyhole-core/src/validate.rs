//! Access token validation against the provider.

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::error::ValidateError;

/// Provider's description of a valid access token. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Ask `validate_url` whether `access_token` is still accepted.
///
/// Sends `Authorization: OAuth <token>`. A 401 means the token is invalid; any
/// other non-200 status is reported with its code.
pub async fn validate_access_token(
    client: &reqwest::Client,
    validate_url: &str,
    access_token: &str,
) -> Result<TokenInfo, ValidateError> {
    let response = client
        .get(validate_url)
        .header(AUTHORIZATION, format!("OAuth {access_token}"))
        .send()
        .await?;

    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        StatusCode::UNAUTHORIZED => Err(ValidateError::InvalidAccessToken),
        status => Err(ValidateError::UnexpectedStatus(status.as_u16())),
    }
}
