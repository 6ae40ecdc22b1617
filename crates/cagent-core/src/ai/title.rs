//! Session title generation.
//!
//! Runs once after the first assistant response, on whatever model the root
//! agent resolved to, with `generating_title` set so adapters keep the call
//! short. Failure is silent: a session without a title is fine.

use tokio_util::sync::CancellationToken;

use crate::ai::adapter::{CallOptions, ModelAdapter, StreamRequest};
use crate::ai::streaming::StreamChunk;
use crate::session::Message;

const TITLE_PROMPT: &str =
    "Generate a short title (at most six words, no quotes, no punctuation at the end) \
     for a conversation that starts with the following user message.";

pub async fn generate_title(adapter: &dyn ModelAdapter, first_user_message: &str) -> Option<String> {
    let request = StreamRequest {
        system: Some(TITLE_PROMPT.to_string()),
        messages: vec![Message::user("title", first_user_message)],
        tools: Vec::new(),
        options: CallOptions {
            generating_title: true,
            ..Default::default()
        },
    };

    let mut rx = match adapter.stream(request, CancellationToken::new()).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::debug!(error = %e, "title generation failed");
            return None;
        }
    };

    let mut title = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::ContentDelta(text) => title.push_str(&text),
            StreamChunk::End(_) => break,
            StreamChunk::Error(e) => {
                tracing::debug!(error = %e, "title generation stream error");
                return None;
            }
            _ => {}
        }
    }

    let title = title.trim().trim_matches('"').to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
