//! OAuth elicitation.
//!
//! When a tool invocation fails with `OAuthRequired`, the agent loop hands
//! the server URL to this coordinator. The coordinator asks the user for
//! consent through the event stream, then drives the browser-based
//! authorization code flow with PKCE against the server's advertised
//! endpoints, and finally stores the bearer token for the retried call.

pub mod browser;
pub mod callback;
pub mod pkce;
pub mod registration;
pub mod state;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::runtime::bus::EventBus;
use crate::runtime::events::{Event, ResumeDecision};
use crate::runtime::gate::ResumeGate;

use callback::CallbackHandle;
use pkce::Verifier;
use state::FlowState;

/// Default port for the local callback server.
pub const DEFAULT_CALLBACK_PORT: u16 = 8083;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth authorization rejected by user")]
    Declined,

    #[error("OAuth callback timed out after 5 minutes")]
    Timeout,

    #[error("OAuth state mismatch: rejecting callback as CSRF")]
    StateMismatch,

    #[error("dynamic client registration failed: {0}")]
    Registration(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("invalid authorization URL: {0}")]
    InvalidUrl(String),

    #[error("could not open browser: {0}")]
    Browser(String),

    #[error("callback server error: {0}")]
    Server(String),

    /// The run was cancelled while the flow was in progress. Not an error
    /// at the run level.
    #[error("OAuth flow cancelled")]
    Cancelled,
}

/// Bearer tokens obtained per server URL, shared with the toolsets that
/// triggered the flows.
#[derive(Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn get(&self, server_url: &str) -> Option<String> {
        self.tokens.read().get(server_url).cloned()
    }

    pub fn set(&self, server_url: &str, token: String) {
        self.tokens.write().insert(server_url.to_string(), token);
    }
}

/// Flow phases, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    AwaitingConsent,
    OpeningBrowser,
    AwaitingCallback,
    ExchangingCode,
    Done,
    Failed,
}

/// Authorization endpoints for one server.
#[derive(Debug, Clone)]
struct ServerMetadata {
    authorization_endpoint: String,
    token_endpoint: String,
    registration_endpoint: Option<String>,
}

pub struct OAuthCoordinator {
    session_id: String,
    callback_port: u16,
    http: reqwest::Client,
    tokens: std::sync::Arc<TokenStore>,
    elicitation: std::sync::Arc<ResumeGate>,
    phase: Mutex<FlowPhase>,
    client_ids: Mutex<HashMap<String, String>>,
    /// Serializes flows: concurrent triggers queue here.
    flow_lock: tokio::sync::Mutex<()>,
}

impl OAuthCoordinator {
    pub fn new(
        session_id: &str,
        callback_port: u16,
        tokens: std::sync::Arc<TokenStore>,
        elicitation: std::sync::Arc<ResumeGate>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            callback_port,
            http: reqwest::Client::new(),
            tokens,
            elicitation,
            phase: Mutex::new(FlowPhase::Idle),
            client_ids: Mutex::new(HashMap::new()),
            flow_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> FlowPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: FlowPhase) {
        debug!(?phase, session_id = %self.session_id, "OAuth phase transition");
        *self.phase.lock() = phase;
    }

    /// Run one elicitation + authorization flow and return the access token.
    pub async fn authorize(
        &self,
        server_url: &str,
        server_type: &str,
        agent: &str,
        bus: &EventBus,
        cancel: &CancellationToken,
    ) -> Result<String, OAuthError> {
        let _flow = self.flow_lock.lock().await;

        self.set_phase(FlowPhase::AwaitingConsent);
        bus.publish(Event::ElicitationRequest {
            agent: agent.to_string(),
            server_url: server_url.to_string(),
            server_type: server_type.to_string(),
        })
        .await;

        let decision = self.elicitation.wait(cancel).await;
        match decision {
            Some(ResumeDecision::ElicitationAccept { .. }) => {}
            Some(ResumeDecision::ElicitationDecline) => {
                self.set_phase(FlowPhase::Failed);
                return Err(OAuthError::Declined);
            }
            Some(other) => {
                warn!(?other, "unexpected decision while awaiting OAuth consent");
                self.set_phase(FlowPhase::Failed);
                return Err(OAuthError::Declined);
            }
            None => {
                self.set_phase(FlowPhase::Failed);
                return Err(OAuthError::Cancelled);
            }
        }

        let result = self.run_browser_flow(server_url, cancel).await;
        match &result {
            Ok(_) => self.set_phase(FlowPhase::Done),
            Err(_) => self.set_phase(FlowPhase::Failed),
        }
        result
    }

    async fn run_browser_flow(
        &self,
        server_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, OAuthError> {
        self.set_phase(FlowPhase::OpeningBrowser);

        let metadata = self.discover(server_url).await?;
        let callback = CallbackHandle::acquire(self.callback_port)
            .map_err(|e| OAuthError::Server(e.to_string()))?;
        let redirect_uri = callback.redirect_uri();

        let client_id = self.client_id(server_url, &metadata, &redirect_uri).await?;
        let verifier = Verifier::generate();
        let flow_state = FlowState::issue(&self.session_id);

        let auth_url = build_auth_url(
            &metadata.authorization_endpoint,
            &client_id,
            &redirect_uri,
            &verifier,
            &flow_state,
        )?;
        let auth_url =
            browser::validate_auth_url(auth_url.as_str()).map_err(|e| OAuthError::InvalidUrl(e.to_string()))?;

        let waiter = callback.register(&self.session_id);
        if let Err(e) = browser::open(&auth_url) {
            callback.unregister(&self.session_id);
            return Err(OAuthError::Browser(e.to_string()));
        }
        info!(%server_url, "browser opened, awaiting OAuth callback");

        self.set_phase(FlowPhase::AwaitingCallback);
        let params = tokio::select! {
            _ = cancel.cancelled() => {
                callback.unregister(&self.session_id);
                return Err(OAuthError::Cancelled);
            }
            result = tokio::time::timeout(CALLBACK_TIMEOUT, waiter) => match result {
                Ok(Ok(params)) => params,
                Ok(Err(_)) => return Err(OAuthError::Server("callback channel closed".into())),
                Err(_) => {
                    callback.unregister(&self.session_id);
                    return Err(OAuthError::Timeout);
                }
            },
        };

        if !flow_state.matches(&params.state) {
            return Err(OAuthError::StateMismatch);
        }

        self.set_phase(FlowPhase::ExchangingCode);
        let token = self
            .exchange_code(&metadata.token_endpoint, &client_id, &params.code, &redirect_uri, &verifier)
            .await?;

        self.tokens.set(server_url, token.clone());
        Ok(token)
    }

    /// RFC 8414 discovery with conventional fallbacks.
    async fn discover(&self, server_url: &str) -> Result<ServerMetadata, OAuthError> {
        let origin = origin_of(server_url)?;
        let well_known = format!("{origin}/.well-known/oauth-authorization-server");

        if let Ok(response) = self.http.get(&well_known).send().await {
            if response.status().is_success() {
                if let Ok(doc) = response.json::<serde_json::Value>().await {
                    if let (Some(auth), Some(token)) = (
                        doc["authorization_endpoint"].as_str(),
                        doc["token_endpoint"].as_str(),
                    ) {
                        return Ok(ServerMetadata {
                            authorization_endpoint: auth.to_string(),
                            token_endpoint: token.to_string(),
                            registration_endpoint: doc["registration_endpoint"]
                                .as_str()
                                .map(str::to_string),
                        });
                    }
                }
            }
        }

        Ok(ServerMetadata {
            authorization_endpoint: format!("{origin}/authorize"),
            token_endpoint: format!("{origin}/token"),
            registration_endpoint: Some(format!("{origin}/register")),
        })
    }

    async fn client_id(
        &self,
        server_url: &str,
        metadata: &ServerMetadata,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        if let Some(id) = self.client_ids.lock().get(server_url) {
            return Ok(id.clone());
        }

        let endpoint = metadata
            .registration_endpoint
            .as_deref()
            .ok_or_else(|| OAuthError::Registration("no registration endpoint advertised".into()))?;
        let id = registration::register_client(&self.http, endpoint, redirect_uri).await?;
        self.client_ids.lock().insert(server_url.to_string(), id.clone());
        Ok(id)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        client_id: &str,
        code: &str,
        redirect_uri: &str,
        verifier: &Verifier,
    ) -> Result<String, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier.as_str()),
        ];

        let response = self
            .http
            .post(token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Exchange(format!("{status}: {body}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        payload["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OAuthError::Exchange("response missing access_token".into()))
    }
}

fn origin_of(server_url: &str) -> Result<String, OAuthError> {
    let url = Url::parse(server_url).map_err(|e| OAuthError::InvalidUrl(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| OAuthError::InvalidUrl("server URL has no host".into()))?;
    let mut origin = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        origin.push_str(&format!(":{port}"));
    }
    Ok(origin)
}

fn build_auth_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    verifier: &Verifier,
    flow_state: &FlowState,
) -> Result<Url, OAuthError> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| OAuthError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", flow_state.as_str())
        .append_pair("code_challenge", &verifier.challenge())
        .append_pair("code_challenge_method", Verifier::method());
    Ok(url)
}
