//! Loopback callback server for the implicit-flow redirect.
//!
//! The provider redirects the browser to `http://localhost:<port>/` with the
//! tokens in the URL fragment. Browsers never send fragments to the server, so
//! `GET /` serves a small bootstrap page whose script re-submits the fragment to
//! `GET /callback?data=<fragment>`. The callback handler validates the payload,
//! resolves the attempt's outcome exactly once, and requests a graceful shutdown
//! of the listener.

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use handlebars::Handlebars;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborators::TokenVerifier;
use crate::error::AuthError;

// ── Types ───────────────────────────────────────────────────────────────────

/// Final result of one login attempt: the access token or the first error.
pub type FlowOutcome = Result<String, AuthError>;

/// Immutable per-attempt values the callback handler checks against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    /// CSRF value echoed back by the provider.
    pub state: String,
    /// Replay value expected inside the signed ID token.
    pub nonce: String,
    /// Port of the registered redirect URI.
    pub redirect_port: u16,
}

/// Write-once slot delivering the [`FlowOutcome`] to the orchestrator.
///
/// Only the first call to [`resolve`](Self::resolve) is observed; later calls
/// are no-ops.
#[derive(Clone)]
pub struct OutcomeSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<FlowOutcome>>>>,
}

impl OutcomeSlot {
    pub fn new() -> (Self, oneshot::Receiver<FlowOutcome>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (slot, rx)
    }

    /// Deliver `outcome` if nothing has been delivered yet.
    ///
    /// Returns `true` when this call was the one that resolved the attempt.
    pub async fn resolve(&self, outcome: FlowOutcome) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => {
                debug!("Login outcome already resolved, ignoring");
                false
            }
        }
    }
}

// ── Fragment parsing ────────────────────────────────────────────────────────

/// Split a re-submitted fragment (`#a=1&b=2`) into key/value pairs.
///
/// Each pair is split once on `=`; pairs without `=` are dropped so that
/// unexpected provider fields cannot break the flow.
pub fn parse_pairs(data: &str) -> Vec<(&str, &str)> {
    data.split('&').filter_map(|pair| pair.split_once('=')).collect()
}

/// Value of the first pair whose key *contains* `key`.
///
/// Containment rather than equality tolerates provider-prefixed names such as
/// the `#access_token` produced by the leading fragment marker. A key like
/// `forwarded_state` would also match `state`; that collision is accepted.
pub fn lookup<'a>(pairs: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.contains(key))
        .map(|(_, value)| *value)
}

#[derive(Deserialize)]
struct NonceClaim {
    #[serde(default)]
    nonce: String,
}

/// Validate a callback payload against the attempt, failing fast in order:
/// state, id_token presence, id_token verification, nonce, access_token.
pub async fn validate_callback(
    attempt: &LoginAttempt,
    verifier: &dyn TokenVerifier,
    data: &str,
) -> FlowOutcome {
    let pairs = parse_pairs(data);

    if lookup(&pairs, "state").unwrap_or_default() != attempt.state {
        return Err(AuthError::StateMismatch);
    }

    let raw_id_token = lookup(&pairs, "id_token")
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingIdToken)?;

    let id_token = verifier
        .verify(raw_id_token)
        .await
        .map_err(|e| AuthError::IdTokenVerificationFailed {
            message: e.to_string(),
        })?;

    let claims: NonceClaim = id_token
        .decode_claims()
        .map_err(|e| AuthError::IdTokenVerificationFailed {
            message: e.to_string(),
        })?;
    if claims.nonce != attempt.nonce {
        return Err(AuthError::NonceMismatch);
    }

    let access_token = lookup(&pairs, "access_token")
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingAccessToken)?;

    Ok(access_token.to_string())
}

// ── Bootstrap page ──────────────────────────────────────────────────────────

const BOOTSTRAP_TEMPLATE: &str = "bootstrap";

/// Delay before the bootstrap page re-sends a callback that hit a network error.
pub const CALLBACK_RETRY_MS: u64 = 500;

/// Page served at `/`. Re-submits the fragment to `/callback`, retrying on
/// network errors and showing the body of any non-2xx response.
pub const BOOTSTRAP_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Keyhole</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<p id="msg"></p>
<script>
  const msg = document.getElementById("msg");
  function deliver() {
    const query = new URLSearchParams({ data: location.hash });
    fetch("http://localhost:{{port}}/callback?" + query.toString())
      .then(function (response) {
        return response.text().then(function (body) {
          msg.textContent = response.ok ? "Thank you! Go back to your terminal." : body;
        });
      })
      .catch(function () {
        setTimeout(deliver, {{retry_ms}});
      });
  }
  if (location.hash.includes("access_token")) {
    deliver();
  }
</script>
</body>
</html>
"#;

// ── Server ──────────────────────────────────────────────────────────────────

struct CallbackState {
    attempt: LoginAttempt,
    verifier: Arc<dyn TokenVerifier>,
    outcome: OutcomeSlot,
    shutdown: CancellationToken,
    templates: Handlebars<'static>,
    port: u16,
}

async fn bootstrap_page(State(state): State<Arc<CallbackState>>) -> Response {
    let data = serde_json::json!({
        "port": state.port,
        "retry_ms": CALLBACK_RETRY_MS,
    });

    let rendered = state
        .templates
        .render(BOOTSTRAP_TEMPLATE, &data)
        .map_err(|e| e.to_string());

    match rendered {
        Ok(page) => Html(page).into_response(),
        Err(message) => {
            let err = AuthError::TemplateRenderFailed { message };
            warn!(error = %err, "Failed to render bootstrap page");
            let response = (err.status_code(), err.to_string()).into_response();
            state.outcome.resolve(Err(err)).await;
            response
        }
    }
}

async fn login_callback(
    State(state): State<Arc<CallbackState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    let data = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "data")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();

    let outcome = validate_callback(&state.attempt, state.verifier.as_ref(), &data).await;
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected login callback");
            (e.status_code(), e.to_string()).into_response()
        }
    };

    state.outcome.resolve(outcome).await;

    // Graceful: the response above is still written before the listener closes.
    state.shutdown.cancel();
    response
}

fn build_callback_router(state: Arc<CallbackState>) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::get(bootstrap_page))
        .route("/callback", axum::routing::get(login_callback))
        .with_state(state)
}

/// A running loopback listener, owned by exactly one login attempt.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<redirect_port>` and start serving in the background.
    pub async fn bind(
        attempt: LoginAttempt,
        verifier: Arc<dyn TokenVerifier>,
        outcome: OutcomeSlot,
    ) -> Result<Self, AuthError> {
        Self::bind_with_page(attempt, verifier, outcome, BOOTSTRAP_PAGE).await
    }

    pub(crate) async fn bind_with_page(
        attempt: LoginAttempt,
        verifier: Arc<dyn TokenVerifier>,
        outcome: OutcomeSlot,
        page: &str,
    ) -> Result<Self, AuthError> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        templates
            .register_template_string(BOOTSTRAP_TEMPLATE, page)
            .map_err(|e| AuthError::TemplateRenderFailed {
                message: e.to_string(),
            })?;

        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, attempt.redirect_port));
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| AuthError::ListenerBindOrServeFailed {
                message: format!(
                    "Failed to bind callback server on port {}: {}. \
                     Make sure no other process is using this port.",
                    attempt.redirect_port, e
                ),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::ListenerBindOrServeFailed {
                message: e.to_string(),
            })?;

        let shutdown = CancellationToken::new();
        let state = Arc::new(CallbackState {
            attempt,
            verifier,
            outcome: outcome.clone(),
            shutdown: shutdown.clone(),
            templates,
            port: local_addr.port(),
        });
        let app = build_callback_router(state);

        debug!(addr = %local_addr, "Login callback server starting");

        let signal = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(signal);
            if let Err(e) = server.await {
                outcome
                    .resolve(Err(AuthError::ListenerBindOrServeFailed {
                        message: e.to_string(),
                    }))
                    .await;
            }
            debug!("Login callback server stopped");
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut down and wait until the listener has been released.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Login callback server task failed");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
