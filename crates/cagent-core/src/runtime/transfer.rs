//! Transfer controller: the stack of active agents.
//!
//! Runs the top frame's loop. A `transfer_task` pushes a frame (after the
//! cycle check); a completed frame pops, surfacing its final assistant
//! content to the parent as the tool result of the originating call. The run
//! ends when the stack empties or a loop ends the run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::ai::title;
use crate::ai::types::ToolCall;
use crate::session::{Message, Role};

use super::agent_loop::{AgentLoop, LoopDeps, LoopEnd, TransferRequest};
use super::events::Event;

struct Frame {
    agent: Arc<Agent>,
    /// The parent's `transfer_task` call this frame answers, if any.
    origin_call: Option<ToolCall>,
    iterations_used: usize,
    max_iterations: usize,
}

impl Frame {
    fn new(agent: Arc<Agent>, origin_call: Option<ToolCall>) -> Self {
        let max_iterations = agent.max_iterations;
        Self {
            agent,
            origin_call,
            iterations_used: 0,
            max_iterations,
        }
    }
}

pub(crate) struct TransferController {
    deps: LoopDeps,
    agents: Arc<HashMap<String, Arc<Agent>>>,
}

impl TransferController {
    pub fn new(deps: LoopDeps, agents: Arc<HashMap<String, Arc<Agent>>>) -> Self {
        Self { deps, agents }
    }

    pub async fn run(self, root: Arc<Agent>) {
        self.spawn_title_task(&root);

        let mut stack = vec![Frame::new(root.clone(), None)];
        self.deps.session.write().push_agent(&root.name);

        while let Some(top) = stack.last_mut() {
            let agent = top.agent.clone();
            let end = AgentLoop::new(&self.deps)
                .run(&agent, &mut top.iterations_used, &mut top.max_iterations)
                .await;

            match end {
                LoopEnd::Completed => {
                    let finished = match stack.pop() {
                        Some(frame) => frame,
                        None => break,
                    };
                    self.deps.session.write().pop_agent();

                    let Some(origin_call) = finished.origin_call else {
                        break; // root finished, run over
                    };

                    let final_content = self.final_assistant_content(&finished.agent.name);
                    let parent = match stack.last() {
                        Some(parent) => parent.agent.name.clone(),
                        None => break,
                    };

                    self.deps.session.write().push(Message::tool_result(
                        &parent,
                        &origin_call.id,
                        &final_content,
                        false,
                    ));
                    self.deps
                        .bus
                        .publish(Event::ToolCallResponse {
                            agent: parent,
                            tool_call: origin_call,
                            response: final_content,
                        })
                        .await;
                }
                LoopEnd::Transfer(request) => {
                    self.handle_transfer(&mut stack, request).await;
                }
                LoopEnd::Cancelled | LoopEnd::Errored | LoopEnd::Stopped => break,
            }
        }
        // Dropping self drops the bus, closing the event channel.
    }

    async fn handle_transfer(&self, stack: &mut Vec<Frame>, request: TransferRequest) {
        let current = stack
            .last()
            .map(|f| f.agent.name.clone())
            .unwrap_or_default();

        // Structural cycle prevention: a name may appear on the stack once.
        if stack.iter().any(|f| f.agent.name == request.target) {
            self.reject_transfer(
                &current,
                &request,
                &format!("transfer rejected: agent '{}' is already active", request.target),
            )
            .await;
            return;
        }

        let Some(target) = self.agents.get(&request.target).cloned() else {
            self.reject_transfer(
                &current,
                &request,
                &format!("transfer rejected: unknown agent '{}'", request.target),
            )
            .await;
            return;
        };

        self.deps
            .session
            .write()
            .push(Message::user(&target.name, &request.task));
        self.deps.session.write().push_agent(&target.name);
        stack.push(Frame::new(target, Some(request.call)));
    }

    /// Synthesize an error tool result so the model can self-correct.
    async fn reject_transfer(&self, agent: &str, request: &TransferRequest, reason: &str) {
        self.deps
            .session
            .write()
            .push(Message::tool_result(agent, &request.call.id, reason, true));
        self.deps
            .bus
            .publish(Event::ToolCallResponse {
                agent: agent.to_string(),
                tool_call: request.call.clone(),
                response: reason.to_string(),
            })
            .await;
    }

    fn final_assistant_content(&self, agent: &str) -> String {
        let session = self.deps.session.read();
        session
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.agent == agent)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn spawn_title_task(&self, root: &Agent) {
        let needs_title = {
            let session = self.deps.session.read();
            session.title.is_empty()
        };
        if !needs_title {
            return;
        }

        let Some(first_user) = self.deps.session.read().last_user_text().map(str::to_string) else {
            return;
        };
        let Ok(resolved) = self.deps.catalog.resolve(&root.model, &first_user) else {
            return;
        };
        let session = self.deps.session.clone();
        tokio::spawn(async move {
            if let Some(generated) = title::generate_title(resolved.adapter.as_ref(), &first_user).await {
                session.write().title = generated;
            }
        });
    }
}
