//! The external runtime API.
//!
//! `run` starts the transfer controller for the session's root agent and
//! returns the event channel; `resume` and `resume_elicitation` feed the
//! suspended gates; `current_agent` and `resolve_command` serve frontends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::ai::router::ModelCatalog;
use crate::commands;
use crate::oauth::{OAuthCoordinator, TokenStore, DEFAULT_CALLBACK_PORT};
use crate::session::{Message, SharedSession};
use crate::tools::registry::{ToolContext, ToolRegistry};

use super::agent_loop::LoopDeps;
use super::bus::EventBus;
use super::confirmation::ConfirmationGate;
use super::events::{Event, ResumeDecision};
use super::gate::ResumeGate;
use super::transfer::TransferController;
use super::RuntimeError;

struct ActiveRun {
    resume: Arc<ResumeGate>,
    elicitation: Arc<ResumeGate>,
    cancel: CancellationToken,
    session: SharedSession,
}

pub struct Runtime {
    agents: Arc<HashMap<String, Arc<Agent>>>,
    root: String,
    registry: Arc<ToolRegistry>,
    catalog: Arc<ModelCatalog>,
    commands: HashMap<String, String>,
    tokens: Arc<TokenStore>,
    callback_port: u16,
    working_dir: PathBuf,
    current: Arc<Mutex<Option<ActiveRun>>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn token_store(&self) -> Arc<TokenStore> {
        self.tokens.clone()
    }

    /// Start a run for the given user message. Returns the event stream; the
    /// channel closes when the run ends. One run per runtime at a time.
    pub fn run(
        &self,
        cancel: CancellationToken,
        session: SharedSession,
        user_message: Message,
    ) -> Result<mpsc::Receiver<Event>, RuntimeError> {
        let root = self
            .agents
            .get(&self.root)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownAgent(self.root.clone()))?;

        let resume = ResumeGate::new();
        let elicitation = ResumeGate::new();
        {
            let mut current = self.current.lock();
            if current.is_some() {
                return Err(RuntimeError::RunActive);
            }

            session.write().push(user_message);

            *current = Some(ActiveRun {
                resume: resume.clone(),
                elicitation: elicitation.clone(),
                cancel: cancel.clone(),
                session: session.clone(),
            });
        }

        let (bus, rx) = EventBus::channel();

        let session_id = session.read().id.clone();
        let oauth = Arc::new(OAuthCoordinator::new(
            &session_id,
            self.callback_port,
            self.tokens.clone(),
            elicitation,
        ));

        let deps = LoopDeps {
            session,
            registry: self.registry.clone(),
            catalog: self.catalog.clone(),
            bus,
            confirmation: Arc::new(ConfirmationGate::new(resume.clone())),
            resume,
            oauth,
            tool_ctx: ToolContext {
                working_dir: self.working_dir.clone(),
                cancel: cancel.clone(),
                timeout: None,
            },
            cancel,
        };

        let controller = TransferController::new(deps, self.agents.clone());
        let slot = self.current.clone();
        tokio::spawn(async move {
            controller.run(root).await;
            slot.lock().take();
        });

        Ok(rx)
    }

    /// Feed a decision into whichever gate is suspended (confirmation or
    /// max-iterations). Errors when nothing is waiting.
    pub fn resume(&self, decision: ResumeDecision) -> Result<(), RuntimeError> {
        if matches!(
            decision,
            ResumeDecision::ElicitationAccept { .. } | ResumeDecision::ElicitationDecline
        ) {
            return Err(RuntimeError::InvalidDecision(
                "elicitation decisions go through resume_elicitation",
            ));
        }

        let gate = self
            .current
            .lock()
            .as_ref()
            .map(|run| run.resume.clone())
            .ok_or(RuntimeError::NothingWaiting)?;
        gate.submit(decision)
    }

    /// Feed the OAuth coordinator's consent gate.
    pub fn resume_elicitation(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let decision = match action {
            "accept" => ResumeDecision::ElicitationAccept { payload },
            "decline" => ResumeDecision::ElicitationDecline,
            _ => return Err(RuntimeError::InvalidDecision("action must be accept or decline")),
        };

        let gate = self
            .current
            .lock()
            .as_ref()
            .map(|run| run.elicitation.clone())
            .ok_or(RuntimeError::NothingWaiting)?;
        gate.submit(decision)
    }

    /// Name of the agent currently at the top of the transfer stack.
    pub fn current_agent(&self) -> String {
        self.current
            .lock()
            .as_ref()
            .and_then(|run| run.session.read().current_agent().map(str::to_string))
            .unwrap_or_else(|| self.root.clone())
    }

    /// Cancel the active run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(run) = self.current.lock().as_ref() {
            run.cancel.cancel();
        }
    }

    /// Expand a `/command` shortcut into prompt text.
    pub fn resolve_command(&self, text: &str) -> String {
        commands::resolve(&self.commands, text)
    }
}

#[derive(Default)]
pub struct RuntimeBuilder {
    agents: HashMap<String, Arc<Agent>>,
    root: Option<String>,
    registry: Option<ToolRegistry>,
    catalog: Option<ModelCatalog>,
    commands: HashMap<String, String>,
    tokens: Option<Arc<TokenStore>>,
    callback_port: Option<u16>,
    working_dir: Option<PathBuf>,
}

impl RuntimeBuilder {
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.insert(agent.name.clone(), Arc::new(agent));
        self
    }

    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn command(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.commands.insert(name.into(), template.into());
        self
    }

    pub fn commands(mut self, commands: HashMap<String, String>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn token_store(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn callback_port(mut self, port: u16) -> Self {
        self.callback_port = Some(port);
        self
    }

    pub fn working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>, RuntimeError> {
        let root = self
            .root
            .or_else(|| self.agents.keys().next().cloned())
            .ok_or(RuntimeError::NoAgents)?;
        if !self.agents.contains_key(&root) {
            return Err(RuntimeError::UnknownAgent(root));
        }
        let catalog = self.catalog.ok_or(RuntimeError::NoCatalog)?;

        Ok(Arc::new(Runtime {
            agents: Arc::new(self.agents),
            root,
            registry: Arc::new(self.registry.unwrap_or_default()),
            catalog: Arc::new(catalog),
            commands: self.commands,
            tokens: self.tokens.unwrap_or_default(),
            callback_port: self.callback_port.unwrap_or(DEFAULT_CALLBACK_PORT),
            working_dir: self
                .working_dir
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from(".")),
            current: Arc::new(Mutex::new(None)),
        }))
    }
}
