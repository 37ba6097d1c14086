//! Authorization URL construction for the implicit flow.
//!
//! The URL starts out as a standard authorization-code request and then has its
//! `response_type` swapped so the provider returns `id_token` and `access_token`
//! in the redirect fragment. There is no client secret to exchange a code with.

use url::Url;

use crate::config::ProviderConfig;
use crate::error::AuthError;

/// `response_type` requesting both tokens directly in the fragment.
pub const IMPLICIT_RESPONSE_TYPE: &str = "token id_token";

/// Build a standard authorization-code request URL.
pub fn authorization_code_url(config: &ProviderConfig, state: &str) -> Result<Url, AuthError> {
    let mut auth_url =
        Url::parse(&config.authorization_url).map_err(|e| AuthError::MalformedEndpointConfig {
            message: format!(
                "Invalid authorization URL '{}': {}",
                config.authorization_url, e
            ),
        })?;

    {
        let mut params = auth_url.query_pairs_mut();
        params.append_pair("client_id", &config.client_id);
        params.append_pair("redirect_uri", &config.redirect_uri);
        params.append_pair("response_type", "code");
        if !config.scopes.is_empty() {
            params.append_pair("scope", &config.scopes.join(" "));
        }
        params.append_pair("state", state);
    }

    Ok(auth_url)
}

/// Build the URL the browser is sent to for an implicit-flow login.
///
/// `nonce` is only sent here; the provider echoes it back solely inside the
/// signed ID token claims.
pub fn build_login_url(
    config: &ProviderConfig,
    state: &str,
    nonce: &str,
) -> Result<String, AuthError> {
    let code_url = authorization_code_url(config, state)?;

    let pairs: Vec<(String, String)> = code_url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "response_type" {
                IMPLICIT_RESPONSE_TYPE.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut login_url = code_url;
    login_url
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("nonce", nonce);

    Ok(login_url.into())
}
