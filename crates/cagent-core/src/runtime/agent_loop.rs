//! One agent's step loop.
//!
//! Per iteration: resolve the model through the router, stream the response
//! into the session, then dispatch the requested tool calls through the
//! confirmation gate and registry. `transfer_task` is a compile-time branch
//! here, not a tool handler: the loop returns it to the transfer controller.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ITERATION_EXTENSION};
use crate::ai::router::ModelCatalog;
use crate::ai::adapter::StreamRequest;
use crate::ai::types::{ToolCall, ToolDefinition};
use crate::oauth::{OAuthCoordinator, OAuthError};
use crate::session::{Message, SharedSession};
use crate::tools::registry::{ToolContext, ToolError, ToolRegistry};
use crate::tools::transfer::{TransferArgs, TRANSFER_TOOL};

use super::bus::EventBus;
use super::confirmation::{ConfirmationGate, Verdict};
use super::events::{Event, ResumeDecision};
use super::gate::ResumeGate;
use super::stream;

/// How a loop invocation ended.
pub(crate) enum LoopEnd {
    /// Model produced a final answer (no tool calls requested).
    Completed,
    /// The model asked to hand off to a sub-agent.
    Transfer(TransferRequest),
    /// The run's context was cancelled. Not an error.
    Cancelled,
    /// Adapter/transport failure or invariant violation; the session is
    /// consistent but the run is over.
    Errored,
    /// The user rejected continuation (confirmation abort or max-iterations
    /// stop).
    Stopped,
}

pub(crate) struct TransferRequest {
    pub call: ToolCall,
    pub target: String,
    pub task: String,
}

pub(crate) struct LoopDeps {
    pub session: SharedSession,
    pub registry: Arc<ToolRegistry>,
    pub catalog: Arc<ModelCatalog>,
    pub bus: EventBus,
    pub confirmation: Arc<ConfirmationGate>,
    pub resume: Arc<ResumeGate>,
    pub oauth: Arc<OAuthCoordinator>,
    pub tool_ctx: ToolContext,
    pub cancel: CancellationToken,
}

pub(crate) struct AgentLoop<'a> {
    deps: &'a LoopDeps,
}

impl<'a> AgentLoop<'a> {
    pub fn new(deps: &'a LoopDeps) -> Self {
        Self { deps }
    }

    /// Run iterations for `agent` until it finishes, transfers, or is
    /// stopped. `iterations_used` and `max_iterations` persist across
    /// re-entries of the same frame (a parent resumed after a transfer keeps
    /// its budget).
    pub async fn run(
        &self,
        agent: &Agent,
        iterations_used: &mut usize,
        max_iterations: &mut usize,
    ) -> LoopEnd {
        let deps = self.deps;
        let name = agent.name.as_str();

        loop {
            if deps.cancel.is_cancelled() {
                return LoopEnd::Cancelled;
            }

            // Iteration budget, with user-confirmed extension.
            if *iterations_used >= *max_iterations {
                deps.bus
                    .publish(Event::MaxIterationsReached {
                        agent: name.to_string(),
                        max: *max_iterations,
                    })
                    .await;
                match deps.resume.wait(&deps.cancel).await {
                    Some(ResumeDecision::Approve) | Some(ResumeDecision::ApproveForSession) => {
                        *max_iterations += ITERATION_EXTENSION;
                    }
                    Some(ResumeDecision::Abort) => {
                        deps.cancel.cancel();
                        return LoopEnd::Stopped;
                    }
                    Some(_) => return LoopEnd::Stopped,
                    None => return LoopEnd::Cancelled,
                }
            }
            *iterations_used += 1;

            // Route and stream one model call.
            let resolve_outcome = {
                let session = deps.session.read();
                let query = session.last_user_text().unwrap_or_default();
                match deps.catalog.resolve(&agent.model, query) {
                    Ok(resolved) => {
                        let mut options = resolved.options;
                        if agent.thinking_budget.is_some() {
                            options.thinking_budget = agent.thinking_budget;
                        }
                        options.structured_output = agent.structured_output.clone();

                        let tools: Vec<ToolDefinition> = deps
                            .registry
                            .descriptors_for(agent)
                            .into_iter()
                            .map(|d| ToolDefinition {
                                name: d.name,
                                description: d.description,
                                input_schema: d.schema,
                            })
                            .collect();

                        Ok((
                            StreamRequest {
                                system: Some(agent.instruction.clone()),
                                messages: session.snapshot(),
                                tools,
                                options,
                            },
                            resolved.adapter,
                        ))
                    }
                    Err(e) => Err(e.to_string()),
                }
            };

            let (request, adapter) = match resolve_outcome {
                Ok(pair) => pair,
                Err(message) => {
                    deps.bus
                        .publish(Event::Error {
                            agent: name.to_string(),
                            message,
                        })
                        .await;
                    return LoopEnd::Errored;
                }
            };

            deps.session.write().push(Message::assistant(name, ""));

            let mut rx = match adapter.stream(request, deps.cancel.child_token()).await {
                Ok(rx) => rx,
                Err(e) => {
                    deps.session.write().discard_empty_last();
                    deps.bus
                        .publish(Event::Error {
                            agent: name.to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    return LoopEnd::Errored;
                }
            };

            let outcome = stream::consume(&mut rx, name, &deps.session, &deps.bus, &deps.cancel).await;

            // Finalize the streamed assistant message with whatever arrived.
            let duplicate_call_id = {
                let mut session = deps.session.write();
                if outcome.tool_calls.is_empty() {
                    session.discard_empty_last();
                    None
                } else {
                    // Duplicate tool-call ids violate a session invariant.
                    let duplicate = outcome
                        .tool_calls
                        .iter()
                        .find(|call| session.has_tool_call_id(&call.id))
                        .map(|call| call.id.clone());

                    if duplicate.is_none() {
                        session.finalize_last(outcome.tool_calls.clone());
                    }
                    duplicate
                }
            };

            if let Some(id) = duplicate_call_id {
                deps.bus
                    .publish(Event::Error {
                        agent: name.to_string(),
                        message: format!("duplicate tool-call id: {}", id),
                    })
                    .await;
                return LoopEnd::Errored;
            }

            if outcome.cancelled {
                return LoopEnd::Cancelled;
            }
            if outcome.errored {
                return LoopEnd::Errored;
            }
            if outcome.tool_calls.is_empty() {
                return LoopEnd::Completed;
            }

            // Dispatch tool calls sequentially, in arrival order. A transfer
            // is deferred so its siblings still get real results.
            let mut transfer: Option<TransferRequest> = None;
            for call in &outcome.tool_calls {
                if deps.cancel.is_cancelled() {
                    self.reject_call(name, call, "aborted").await;
                    continue;
                }

                if call.name == TRANSFER_TOOL {
                    match self.parse_transfer(agent, call) {
                        Ok(request) if transfer.is_none() => transfer = Some(request),
                        Ok(_) => {
                            self.reject_call(name, call, "only one transfer may be requested per turn")
                                .await;
                        }
                        Err(reason) => self.reject_call(name, call, &reason).await,
                    }
                    continue;
                }

                match self.dispatch(agent, call).await {
                    DispatchEnd::Continue => {}
                    DispatchEnd::Cancelled => return LoopEnd::Cancelled,
                    DispatchEnd::Fatal => return LoopEnd::Errored,
                    DispatchEnd::Aborted => {
                        self.reject_call(name, call, "aborted").await;
                        return LoopEnd::Stopped;
                    }
                }
            }

            if let Some(request) = transfer {
                return LoopEnd::Transfer(request);
            }
        }
    }

    fn parse_transfer(&self, agent: &Agent, call: &ToolCall) -> Result<TransferRequest, String> {
        let args: TransferArgs = crate::tools::registry::parse_args(&call.arguments)
            .map_err(|e| e.to_string())?;
        if !agent.can_transfer_to(&args.agent) {
            return Err(format!("'{}' is not a sub-agent of '{}'", args.agent, agent.name));
        }
        Ok(TransferRequest {
            call: call.clone(),
            target: args.agent,
            task: args.task,
        })
    }

    /// Synthesize an error tool result without running anything.
    async fn reject_call(&self, agent: &str, call: &ToolCall, reason: &str) {
        self.deps
            .session
            .write()
            .push(Message::tool_result(agent, &call.id, reason, true));
        self.deps
            .bus
            .publish(Event::ToolCallResponse {
                agent: agent.to_string(),
                tool_call: call.clone(),
                response: reason.to_string(),
            })
            .await;
    }

    async fn dispatch(&self, agent: &Agent, call: &ToolCall) -> DispatchEnd {
        let deps = self.deps;
        let name = agent.name.as_str();

        // Unknown tools skip the gate; the registry reports NotFound below
        // and the model gets to self-correct.
        let descriptor = deps
            .registry
            .descriptor(&call.name)
            .cloned()
            .unwrap_or_else(|| crate::tools::registry::ToolDescriptor {
                name: call.name.clone(),
                display_name: call.name.clone(),
                description: String::new(),
                schema: serde_json::json!({}),
                requires_confirmation: false,
            });

        match deps
            .confirmation
            .decide(&descriptor, call, name, &deps.session, &deps.bus, &deps.cancel)
            .await
        {
            Verdict::Run => {}
            Verdict::Skip(reason) => {
                self.reject_call(name, call, &reason).await;
                return DispatchEnd::Continue;
            }
            Verdict::Aborted => return DispatchEnd::Aborted,
        }

        deps.bus
            .publish(Event::ToolCall {
                agent: name.to_string(),
                tool_call: call.clone(),
            })
            .await;

        let mut result = deps.registry.invoke(&call.name, &call.arguments, &deps.tool_ctx).await;

        // An OAuth round-trip earns the invocation exactly one retry.
        let oauth_target = match &result {
            Err(ToolError::OAuthRequired {
                server_url,
                server_type,
                ..
            }) => Some((server_url.clone(), server_type.clone())),
            _ => None,
        };
        if let Some((server_url, server_type)) = oauth_target {
            match deps
                .oauth
                .authorize(&server_url, &server_type, name, &deps.bus, &deps.cancel)
                .await
            {
                Ok(_) => {
                    result = deps.registry.invoke(&call.name, &call.arguments, &deps.tool_ctx).await;
                }
                Err(OAuthError::Cancelled) => return DispatchEnd::Cancelled,
                Err(e) => {
                    deps.bus
                        .publish(Event::Error {
                            agent: name.to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    return DispatchEnd::Fatal;
                }
            }
        }

        let (response, is_error) = match result {
            Ok(output) => (output, false),
            Err(e) => (e.to_string(), true),
        };

        deps.session
            .write()
            .push(Message::tool_result(name, &call.id, &response, is_error));
        deps.bus
            .publish(Event::ToolCallResponse {
                agent: name.to_string(),
                tool_call: call.clone(),
                response,
            })
            .await;

        DispatchEnd::Continue
    }
}

enum DispatchEnd {
    Continue,
    Cancelled,
    Fatal,
    Aborted,
}
