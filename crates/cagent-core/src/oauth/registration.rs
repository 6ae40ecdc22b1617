//! Dynamic client registration (RFC 7591).
//!
//! MCP servers rarely ship with pre-provisioned client ids; when none is
//! known, we register a public client on the fly and use the returned id.

use serde_json::json;

use super::OAuthError;

pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    redirect_uri: &str,
) -> Result<String, OAuthError> {
    let body = json!({
        "client_name": "cagent",
        "redirect_uris": [redirect_uri],
        "grant_types": ["authorization_code"],
        "response_types": ["code"],
        "token_endpoint_auth_method": "none",
    });

    let response = http
        .post(registration_endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|e| OAuthError::Registration(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::Registration(format!("{status}: {body}")));
    }

    let payload: serde_json::Value = response
        .json()
        .await
        .map_err(|e| OAuthError::Registration(e.to_string()))?;

    payload["client_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| OAuthError::Registration("response missing client_id".to_string()))
}
