//! Process-global OAuth callback server.
//!
//! One `tiny_http` server per process, reference-counted by sessions.
//! Callbacks land on `/oauth-callback?code=…&state=…`; the state's embedded
//! session id routes the parameters to whichever session registered a
//! waiter. The last release unblocks the accept loop and joins the thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::state::decode_session_id;

pub const CALLBACK_PATH: &str = "/oauth-callback";

/// Query parameters delivered to the waiting session.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<CallbackParams>>>>;

struct ServerState {
    server: Arc<tiny_http::Server>,
    thread: Option<JoinHandle<()>>,
    pending: PendingMap,
    port: u16,
    refs: usize,
}

static SERVER: Lazy<Mutex<Option<ServerState>>> = Lazy::new(|| Mutex::new(None));

/// A session's reference to the shared callback server.
pub struct CallbackHandle {
    pending: PendingMap,
    port: u16,
}

impl CallbackHandle {
    /// Start the server if needed, otherwise bump the refcount. Acquiring
    /// with a different port while the server is live reuses the live one.
    pub fn acquire(port: u16) -> Result<Self> {
        let mut slot = SERVER.lock();

        if let Some(state) = slot.as_mut() {
            state.refs += 1;
            return Ok(Self {
                pending: state.pending.clone(),
                port: state.port,
            });
        }

        let server = tiny_http::Server::http(("127.0.0.1", port))
            .map_err(|e| anyhow::anyhow!("cannot bind callback server on port {port}: {e}"))
            .context("starting OAuth callback server")?;
        let port = server.server_addr().to_ip().map(|a| a.port()).unwrap_or(port);
        let server = Arc::new(server);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let accept_server = server.clone();
        let accept_pending = pending.clone();
        let thread = std::thread::Builder::new()
            .name("oauth-callback".into())
            .spawn(move || accept_loop(accept_server, accept_pending))
            .context("spawning OAuth callback thread")?;

        *slot = Some(ServerState {
            server,
            thread: Some(thread),
            pending: pending.clone(),
            port,
            refs: 1,
        });

        Ok(Self { pending, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, CALLBACK_PATH)
    }

    /// Register a waiter for this session's next callback.
    pub fn register(&self, session_id: &str) -> oneshot::Receiver<CallbackParams> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(session_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.pending.lock().remove(session_id);
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        let mut slot = SERVER.lock();
        let Some(state) = slot.as_mut() else {
            return;
        };
        state.refs -= 1;
        if state.refs > 0 {
            return;
        }

        // Last session out: unblock the accept loop and join. `unblock`
        // makes `incoming_requests` return promptly, keeping the stop
        // within its 3 s budget.
        state.server.unblock();
        if let Some(thread) = state.thread.take() {
            let _ = thread.join();
        }
        *slot = None;
    }
}

fn accept_loop(server: Arc<tiny_http::Server>, pending: PendingMap) {
    for request in server.incoming_requests() {
        let url = request.url().to_string();
        if !url.starts_with(CALLBACK_PATH) {
            respond(request, 404, "not found");
            continue;
        }

        let params = parse_query(&url);
        let (code, state) = match (params.get("code"), params.get("state")) {
            (Some(code), Some(state)) => (code.clone(), state.clone()),
            _ => {
                respond(request, 400, "missing code or state parameter");
                continue;
            }
        };

        let Some(session_id) = decode_session_id(&state) else {
            respond(request, 400, "unrecognized state parameter");
            continue;
        };

        match pending.lock().remove(&session_id) {
            Some(waiter) => {
                let _ = waiter.send(CallbackParams { code, state });
                respond(request, 200, "Authorization complete. You can close this window and return to cagent.");
            }
            None => {
                tracing::warn!(session_id, "OAuth callback for a session with no waiter");
                respond(request, 410, "no authorization in progress for this session");
            }
        }
    }
}

fn parse_query(url: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = url.split('?').nth(1) {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }
    params
}

fn respond(request: tiny_http::Request, status: u16, message: &str) {
    let html = format!(
        "<!DOCTYPE html><html><head><title>cagent</title></head>\
         <body style=\"font-family: sans-serif; margin: 4rem\"><p>{}</p></body></html>",
        html_escape(message)
    );
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]);
    let mut response = tiny_http::Response::from_string(html).with_status_code(status);
    if let Ok(header) = header {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() {
        let params = parse_query("/oauth-callback?code=abc&state=xyz");
        assert_eq!(params.get("code"), Some(&"abc".to_string()));
        assert_eq!(params.get("state"), Some(&"xyz".to_string()));
    }

    #[test]
    fn refcounted_acquire_release() {
        let first = CallbackHandle::acquire(0).unwrap();
        let port = first.port();
        assert_ne!(port, 0, "server bound an ephemeral port");

        // Second acquire reuses the live server even with another port hint.
        let second = CallbackHandle::acquire(9).unwrap();
        assert_eq!(second.port(), port);

        drop(first);
        assert!(SERVER.lock().is_some(), "server stays up while referenced");
        drop(second);
        assert!(SERVER.lock().is_none(), "last release stops the server");
    }
}
