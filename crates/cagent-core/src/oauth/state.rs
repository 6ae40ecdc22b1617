//! OAuth `state` parameter.
//!
//! The state is `base64url(json!{session_id, nonce})`. The embedded session
//! id lets the process-global callback server route a callback to the
//! session that issued it; the 128-bit nonce makes the value unguessable so
//! an equality check defeats CSRF.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    session_id: String,
    nonce: String,
}

/// A state value issued for one authorization round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowState(String);

impl FlowState {
    pub fn issue(session_id: &str) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let payload = Payload {
            session_id: session_id.to_string(),
            nonce: URL_SAFE_NO_PAD.encode(bytes),
        };
        // Serializing a two-string struct cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        Self(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-shape equality check against an echoed value.
    pub fn matches(&self, echoed: &str) -> bool {
        self.0 == echoed
    }
}

/// Extract the owning session id from an echoed state, for routing only.
/// Routing is advisory; authenticity still rests on the equality check.
pub fn decode_session_id(state: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let payload: Payload = serde_json::from_slice(&bytes).ok()?;
    Some(payload.session_id)
}
