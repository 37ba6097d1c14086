//! # Keyhole Core
//!
//! Browser-mediated OAuth2 implicit-flow login for command-line applications.
//! A short-lived listener on `localhost` receives the provider's redirect, the
//! ID token is verified, and the access token is handed back to the caller.

pub mod callback;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod flow;
pub mod login_url;
pub mod oidc;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use callback::{CallbackServer, FlowOutcome, LoginAttempt, OutcomeSlot};
pub use collaborators::{
    BrowserLauncher, RandomTokenSource, SystemBrowser, TokenSource, TokenVerifier,
    VerifiedIdToken,
};
pub use config::{ConfigOverrides, KeyholeConfig, ProviderConfig, load_config};
pub use error::{AuthError, ConfigError, ValidateError, VerifyError};
pub use flow::{AttemptPhase, authenticate, authenticate_with_timeout};
pub use login_url::build_login_url;
pub use oidc::OidcVerifier;
pub use validate::{TokenInfo, validate_access_token};
