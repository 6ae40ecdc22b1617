//! Model stream consumption.
//!
//! Applies each chunk to the session (content grows the in-flight assistant
//! message in place), mirrors it onto the event bus, and assembles tool-call
//! fragments into complete calls. Argument JSON is never parsed here; that
//! happens at execution time, after the terminating marker.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::StreamChunk;
use crate::ai::types::ToolCall;
use crate::session::SharedSession;

use super::bus::EventBus;
use super::events::Event;

/// Abort the iteration when the adapter goes quiet for this long.
const STREAM_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
pub(crate) struct StreamOutcome {
    pub tool_calls: Vec<ToolCall>,
    pub content_received: bool,
    pub errored: bool,
    pub cancelled: bool,
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

pub(crate) async fn consume(
    rx: &mut mpsc::Receiver<StreamChunk>,
    agent: &str,
    session: &SharedSession,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let mut outcome = StreamOutcome::default();
    // Pending calls in arrival order; fragments are keyed by id, with
    // id-less continuations appended to the most recent call.
    let mut pending: Vec<PendingCall> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut saw_end = false;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            chunk = tokio::time::timeout(STREAM_INACTIVITY_TIMEOUT, rx.recv()) => match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => {
                    bus.publish(Event::Error {
                        agent: agent.to_string(),
                        message: format!(
                            "model stream stalled: no data for {} seconds",
                            STREAM_INACTIVITY_TIMEOUT.as_secs()
                        ),
                    })
                    .await;
                    outcome.errored = true;
                    break;
                }
            },
        };

        match chunk {
            StreamChunk::ContentDelta(text) => {
                session.write().append_to_last(&text);
                outcome.content_received = true;
                bus.publish(Event::AgentChoice {
                    agent: agent.to_string(),
                    content: text,
                })
                .await;
            }
            StreamChunk::ReasoningDelta(text) => {
                bus.publish(Event::AgentChoiceReasoning {
                    agent: agent.to_string(),
                    content: text,
                })
                .await;
            }
            StreamChunk::ToolCallDelta {
                id,
                name,
                arguments_fragment,
            } => {
                let idx = if !id.is_empty() {
                    match by_id.get(&id) {
                        Some(idx) => *idx,
                        None => {
                            pending.push(PendingCall {
                                id: id.clone(),
                                name: String::new(),
                                arguments: String::new(),
                            });
                            by_id.insert(id, pending.len() - 1);
                            pending.len() - 1
                        }
                    }
                } else if pending.is_empty() {
                    tracing::warn!("dropping tool-call fragment with no id and no open call");
                    continue;
                } else {
                    pending.len() - 1
                };

                let call = &mut pending[idx];
                if let Some(name) = name {
                    call.name = name;
                }
                call.arguments.push_str(&arguments_fragment);
            }
            StreamChunk::Usage(usage) => {
                session.write().add_usage(&usage);
                bus.publish(Event::Usage {
                    agent: agent.to_string(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cached_tokens: usage.cached_tokens,
                    cost: usage.cost,
                })
                .await;
            }
            StreamChunk::End(_) => {
                saw_end = true;
                break;
            }
            StreamChunk::Error(message) => {
                bus.publish(Event::Error {
                    agent: agent.to_string(),
                    message,
                })
                .await;
                outcome.errored = true;
                break;
            }
        }
    }

    // A stream that dies mid-tool-call without an End marker left us with
    // argument JSON we must not execute.
    if !saw_end && !outcome.cancelled && !outcome.errored && has_partial_arguments(&pending) {
        bus.publish(Event::Error {
            agent: agent.to_string(),
            message: "model stream ended with incomplete tool-call arguments".to_string(),
        })
        .await;
        outcome.errored = true;
    }

    if !outcome.errored && !outcome.cancelled {
        outcome.tool_calls = pending
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall {
                id: c.id,
                name: c.name,
                arguments: if c.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    c.arguments
                },
            })
            .collect();
    }

    outcome
}

fn has_partial_arguments(pending: &[PendingCall]) -> bool {
    pending.iter().any(|c| {
        !c.arguments.trim().is_empty()
            && serde_json::from_str::<serde_json::Value>(&c.arguments).is_err()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{FinishReason, Usage};
    use crate::session::{Message, Session};

    async fn run_chunks(chunks: Vec<StreamChunk>) -> (StreamOutcome, SharedSession, Vec<Event>) {
        let session = Session::new().shared();
        session.write().push(Message::assistant("root", ""));
        let (bus, mut events_rx) = EventBus::channel();
        let (tx, mut rx) = mpsc::channel(16);
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        drop(tx);

        let outcome = consume(&mut rx, "root", &session, &bus, &CancellationToken::new()).await;
        drop(bus);

        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        (outcome, session, events)
    }

    #[tokio::test]
    async fn content_grows_in_place_and_mirrors_to_events() {
        let (outcome, session, events) = run_chunks(vec![
            StreamChunk::ContentDelta("hel".into()),
            StreamChunk::ContentDelta("lo".into()),
            StreamChunk::End(FinishReason::Stop),
        ])
        .await;

        assert!(outcome.content_received);
        assert_eq!(session.read().messages()[0].content, "hello");
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::AgentChoice { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn fragments_assemble_in_order() {
        let (outcome, _, _) = run_chunks(vec![
            StreamChunk::ToolCallDelta {
                id: "call_1".into(),
                name: Some("read_file".into()),
                arguments_fragment: "{\"pa".into(),
            },
            StreamChunk::ToolCallDelta {
                id: "call_1".into(),
                name: None,
                arguments_fragment: "th\": \"/tmp/a\"}".into(),
            },
            StreamChunk::End(FinishReason::ToolCalls),
        ])
        .await;

        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].arguments, r#"{"path": "/tmp/a"}"#);
    }

    #[tokio::test]
    async fn idless_continuations_attach_to_last_call() {
        let (outcome, _, _) = run_chunks(vec![
            StreamChunk::ToolCallDelta {
                id: "call_1".into(),
                name: Some("shell".into()),
                arguments_fragment: "{\"command\":".into(),
            },
            StreamChunk::ToolCallDelta {
                id: String::new(),
                name: None,
                arguments_fragment: " \"ls\"}".into(),
            },
            StreamChunk::End(FinishReason::ToolCalls),
        ])
        .await;

        assert_eq!(outcome.tool_calls[0].arguments, r#"{"command": "ls"}"#);
    }

    #[tokio::test]
    async fn reasoning_is_not_appended_to_session() {
        let (_, session, events) = run_chunks(vec![
            StreamChunk::ReasoningDelta("thinking...".into()),
            StreamChunk::End(FinishReason::Stop),
        ])
        .await;

        assert_eq!(session.read().messages()[0].content, "");
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::AgentChoiceReasoning { .. })));
    }

    #[tokio::test]
    async fn partial_json_without_end_is_an_error() {
        let (outcome, _, events) = run_chunks(vec![StreamChunk::ToolCallDelta {
            id: "call_1".into(),
            name: Some("shell".into()),
            arguments_fragment: "{\"comm".into(),
        }])
        .await;

        assert!(outcome.errored);
        assert!(outcome.tool_calls.is_empty());
        assert!(events.iter().any(|e| matches!(e, Event::Error { .. })));
    }

    #[tokio::test]
    async fn usage_accumulates_on_session() {
        let (_, session, events) = run_chunks(vec![
            StreamChunk::Usage(Usage {
                input_tokens: 100,
                output_tokens: 7,
                cached_tokens: 50,
                cost: 0.01,
            }),
            StreamChunk::End(FinishReason::Stop),
        ])
        .await;

        assert_eq!(session.read().usage().input_tokens, 100);
        assert_eq!(session.read().usage().cached_tokens, 50);
        assert!(events.iter().any(|e| matches!(e, Event::Usage { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_consumption_without_error() {
        let session = Session::new().shared();
        session.write().push(Message::assistant("root", ""));
        let (bus, _events_rx) = EventBus::channel();
        let (tx, mut rx) = mpsc::channel(16);
        tx.send(StreamChunk::ContentDelta("partial".into())).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        // The sender stays open: only cancellation can end this consume call.
        let outcome = consume(&mut rx, "root", &session, &bus, &cancel).await;

        assert!(outcome.cancelled);
        assert!(!outcome.errored);
        drop(tx);
    }
}
