//! Error types for the Keyhole login core.
//!
//! Uses `thiserror` for public API error types. `AuthError` is the single error
//! returned for a login attempt; the other enums cover configuration, ID token
//! verification, and post-login token validation.

use axum::http::StatusCode;

/// Failure of a single login attempt.
///
/// Every variant is terminal for the attempt. Retrying means starting a new
/// attempt with a fresh state/nonce pair.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to generate random token: {message}")]
    RandomnessGenerationFailed { message: String },

    #[error("Malformed endpoint configuration: {message}")]
    MalformedEndpointConfig { message: String },

    #[error("Failed to open browser: {message}")]
    BrowserLaunchFailed { message: String },

    #[error("Callback listener failed: {message}")]
    ListenerBindOrServeFailed { message: String },

    #[error("failed state validation")]
    StateMismatch,

    #[error("id_token not found")]
    MissingIdToken,

    #[error("failed to verify id_token: {message}")]
    IdTokenVerificationFailed { message: String },

    #[error("failed nonce validation")]
    NonceMismatch,

    #[error("access_token not found")]
    MissingAccessToken,

    #[error("Failed to render login page: {message}")]
    TemplateRenderFailed { message: String },

    #[error("Login timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },
}

impl AuthError {
    /// HTTP status sent to the browser when this error ends a callback request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::StateMismatch
            | AuthError::MissingIdToken
            | AuthError::NonceMismatch
            | AuthError::MissingAccessToken => StatusCode::BAD_REQUEST,
            AuthError::IdTokenVerificationFailed { .. } => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
}

/// Errors raised by a [`TokenVerifier`](crate::collaborators::TokenVerifier).
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Provider discovery failed: {message}")]
    Discovery { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Failed to decode claims: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Errors from validating an access token with the provider.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("invalid access token: status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Validation request failed: {0}")]
    Http(#[from] reqwest::Error),
}
