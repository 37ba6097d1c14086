//! Login flow orchestration.
//!
//! 1. Generate state and nonce
//! 2. Build the authorization URL
//! 3. Bind the loopback callback server
//! 4. Open the user's browser
//! 5. Wait for the callback to resolve the attempt
//! 6. Release the listener and return the access token or error
//!
//! Phases of one attempt: `Created -> AwaitingRedirect -> Resolved | Failed -> Closed`.
//! `Closed` is always reached before [`authenticate`] returns once the listener is bound.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::callback::{CallbackServer, FlowOutcome, LoginAttempt, OutcomeSlot};
use crate::collaborators::{BrowserLauncher, TokenSource, TokenVerifier};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::login_url::build_login_url;

/// Lifecycle phase of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Created,
    AwaitingRedirect,
    Resolved,
    Failed,
    Closed,
}

impl std::fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptPhase::Created => write!(f, "created"),
            AttemptPhase::AwaitingRedirect => write!(f, "awaiting_redirect"),
            AttemptPhase::Resolved => write!(f, "resolved"),
            AttemptPhase::Failed => write!(f, "failed"),
            AttemptPhase::Closed => write!(f, "closed"),
        }
    }
}

fn enter(phase: AttemptPhase) {
    debug!(phase = %phase, "Login attempt phase");
}

/// Run a full browser login and wait indefinitely for the redirect.
pub async fn authenticate(
    config: &ProviderConfig,
    verifier: Arc<dyn TokenVerifier>,
    tokens: &dyn TokenSource,
    browser: &dyn BrowserLauncher,
) -> Result<String, AuthError> {
    authenticate_with_timeout(config, verifier, tokens, browser, None).await
}

/// Run a full browser login, giving up after `timeout` if one is set.
pub async fn authenticate_with_timeout(
    config: &ProviderConfig,
    verifier: Arc<dyn TokenVerifier>,
    tokens: &dyn TokenSource,
    browser: &dyn BrowserLauncher,
    timeout: Option<Duration>,
) -> Result<String, AuthError> {
    let state = generate(tokens)?;
    let nonce = generate(tokens)?;

    let login_url = build_login_url(config, &state, &nonce)?;
    let attempt = LoginAttempt {
        state,
        nonce,
        redirect_port: config.redirect_port()?,
    };
    enter(AttemptPhase::Created);

    let (outcome, rx) = OutcomeSlot::new();
    let server = CallbackServer::bind(attempt, verifier, outcome).await?;

    info!("Opening browser for login...");
    debug!(url = %login_url, "Authorization URL");
    if let Err(e) = browser.open(&login_url) {
        server.close().await;
        enter(AttemptPhase::Closed);
        return Err(AuthError::BrowserLaunchFailed {
            message: e.to_string(),
        });
    }
    enter(AttemptPhase::AwaitingRedirect);

    let result = wait_for_outcome(rx, timeout).await;
    enter(if result.is_ok() {
        AttemptPhase::Resolved
    } else {
        AttemptPhase::Failed
    });

    server.close().await;
    enter(AttemptPhase::Closed);

    if result.is_ok() {
        info!("Login completed");
    }
    result
}

fn generate(tokens: &dyn TokenSource) -> Result<String, AuthError> {
    tokens
        .generate()
        .map_err(|e| AuthError::RandomnessGenerationFailed {
            message: e.to_string(),
        })
}

async fn wait_for_outcome(
    rx: oneshot::Receiver<FlowOutcome>,
    timeout: Option<Duration>,
) -> FlowOutcome {
    let received = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(received) => received,
            Err(_) => {
                return Err(AuthError::TimedOut {
                    timeout_secs: limit.as_secs(),
                });
            }
        },
        None => rx.await,
    };

    received.unwrap_or_else(|_| {
        Err(AuthError::ListenerBindOrServeFailed {
            message: "Callback server stopped before a login result was delivered".to_string(),
        })
    })
}
