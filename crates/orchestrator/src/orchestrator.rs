//! The per-turn orchestrator: model call, plan assembly, tool execution,
//! turn finalization, and chain evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;

use ag_domain::config::AgentConfig;
use ag_domain::llm::{ChatMessage, GenerateRequest, ProviderFinder};
use ag_domain::plan::{Elicitation, Plan};
use ag_domain::stream::{StreamEvent, Usage};
use ag_domain::tool::ToolRegistry;
use ag_domain::workspace::ENV_SCHEDULER_DEBUG;
use ag_domain::{
    Error, ExecContext, Message, MessageKind, Payload, PayloadKind, Result, Role, ToolCallStatus,
    TurnMeta, TurnStatus,
};
use ag_store::{
    ConversationPatch, ConversationStore, MessagePatch, ModelCallPatch, PayloadPatch, TurnPatch,
};

use crate::chains::ChainEvaluator;
use crate::executor::Executor;
use crate::planner;
use crate::scheduler::StepScheduler;
use crate::traces::TraceStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs, outcomes, seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub conversation_id: String,
    pub agent_id: String,
    pub query: String,
    pub user_id: Option<String>,
    /// Model override; falls back to conversation default, then agent model.
    pub model: Option<String>,
    pub context: HashMap<String, Value>,
}

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub conversation_id: String,
    pub agent_id: String,
    pub status: TurnStatus,
    pub content: String,
    pub usage: Usage,
    pub model: Option<String>,
    pub error: Option<String>,
    pub elicitation: Option<Elicitation>,
    pub user_id: Option<String>,
    pub context: HashMap<String, Value>,
}

impl Default for TurnOutcome {
    fn default() -> Self {
        Self {
            turn_id: String::new(),
            conversation_id: String::new(),
            agent_id: String::new(),
            status: TurnStatus::Running,
            content: String::new(),
            usage: Usage::default(),
            model: None,
            error: None,
            elicitation: None,
            user_id: None,
            context: HashMap::new(),
        }
    }
}

/// Runs a turn; the seam chains recurse through.
#[async_trait::async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run(&self, ctx: &ExecContext, input: TurnInput) -> Result<TurnOutcome>;
}

/// Resolves agent configurations by id.
#[async_trait::async_trait]
pub trait AgentFinder: Send + Sync {
    async fn find(&self, ctx: &ExecContext, id: &str) -> Result<AgentConfig>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn driver. Collaborators are shared `Arc`s; per-turn state (executor,
/// scheduler, plan) is built fresh for every [`Orchestrator::run_turn`].
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    registry: Arc<dyn ToolRegistry>,
    providers: Arc<dyn ProviderFinder>,
    agents: Arc<dyn AgentFinder>,
    traces: Arc<TraceStore>,
    retry_budget: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: Arc<dyn ToolRegistry>,
        providers: Arc<dyn ProviderFinder>,
        agents: Arc<dyn AgentFinder>,
    ) -> Self {
        Self {
            store,
            registry,
            providers,
            agents,
            traces: Arc::new(TraceStore::new()),
            retry_budget: crate::executor::DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn traces(&self) -> &Arc<TraceStore> {
        &self.traces
    }

    /// Fresh per-turn executor sharing this orchestrator's collaborators.
    fn executor_for_turn(&self) -> Arc<Executor> {
        Arc::new(
            Executor::new(
                self.store.clone(),
                self.registry.clone(),
                self.traces.clone(),
            )
            .with_retry_budget(self.retry_budget),
        )
    }

    pub async fn run_turn(&self, ctx: &ExecContext, input: TurnInput) -> Result<TurnOutcome> {
        let agent = self.agents.find(ctx, &input.agent_id).await?;
        let conversation = self
            .store
            .get_conversation(ctx, &input.conversation_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("conversation {}", input.conversation_id)))?;

        // ── Open the turn ────────────────────────────────────────────
        let turn_id = uuid::Uuid::new_v4().to_string();
        let user_message_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let mut turn = TurnPatch::new(&turn_id);
        turn.conversation_id = Some(input.conversation_id.clone());
        turn.parent_message_id = Some(user_message_id.clone());
        turn.status = Some(TurnStatus::Running);
        turn.started_at = Some(started_at);
        turn.agent_id_used = Some(agent.id.clone());
        self.store.patch_turn(ctx, turn).await?;

        let mut conversation_patch = ConversationPatch::new(&input.conversation_id);
        conversation_patch.last_turn_id = Some(turn_id.clone());
        conversation_patch.status = Some(TurnStatus::Running);
        self.store
            .patch_conversations(ctx, &[conversation_patch])
            .await?;

        let mut user_message = Message::new(
            user_message_id.clone(),
            input.conversation_id.clone(),
            turn_id.clone(),
            turn_id.clone(),
            Role::User,
            MessageKind::Text,
        );
        user_message.content = input.query.clone();
        user_message.raw_content = Some(input.query.clone());
        if ctx.chain_mode() {
            user_message.mode = Some("chain".into());
        }
        self.store
            .patch_message(ctx, MessagePatch::from(user_message))
            .await?;

        let turn_ctx = ctx.with_turn(TurnMeta {
            turn_id: turn_id.clone(),
            conversation_id: input.conversation_id.clone(),
            parent_message_id: user_message_id.clone(),
            trace_id: None,
        });

        // ── Model call + plan assembly + streamed scheduling ─────────
        let model = input
            .model
            .clone()
            .or_else(|| conversation.default_model.clone())
            .or_else(|| agent.model.clone());
        let provider = self.providers.find(&turn_ctx, model.as_deref()).await?;

        let request = GenerateRequest {
            messages: vec![ChatMessage::user(input.query.clone())],
            tools: Vec::new(),
            model: model.clone(),
            mode: turn_ctx.chain_mode().then(|| "chain".to_string()),
        };
        let request_payload = Payload::inline(
            uuid::Uuid::new_v4().to_string(),
            PayloadKind::ModelRequest,
            "application/json",
            serde_json::to_vec(&request.messages)?,
        );
        let request_payload_id = request_payload.id.clone();
        self.store
            .patch_payload(&turn_ctx, PayloadPatch::from(request_payload))
            .await?;
        let mut model_call = ModelCallPatch {
            message_id: turn_id.clone(),
            ..Default::default()
        };
        model_call.turn_id = Some(turn_id.clone());
        model_call.provider = Some(provider.provider_id().to_owned());
        model_call.model = Some(model.clone().unwrap_or_default());
        model_call.status = Some(ToolCallStatus::Running);
        model_call.request_payload_id = Some(request_payload_id);
        model_call.started_at = Some(started_at);
        self.store.patch_model_call(&turn_ctx, model_call).await?;

        let executor = self.executor_for_turn();
        let scheduler = StepScheduler::new(executor, turn_ctx.clone());

        let mut plan = Plan::default();
        let mut content = String::new();
        let mut usage = Usage::default();
        let mut model_used = model.clone();
        let mut stream_error: Option<Error> = None;

        if provider.supports_streaming() {
            let mut stream = provider.stream(&turn_ctx, request).await?;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::Choice { choice }) => {
                        content = choice.content.clone();
                        if choice.model.is_some() {
                            model_used = choice.model.clone();
                        }
                        for step in planner::extend_plan_from_choice(&mut plan, &choice) {
                            scheduler.schedule(step);
                        }
                    }
                    Ok(StreamEvent::Done { usage: u, .. }) => {
                        if let Some(u) = u {
                            usage.add(u);
                        }
                    }
                    Ok(StreamEvent::Error { message }) => {
                        stream_error = Some(Error::Other(message));
                        break;
                    }
                    Err(e) => {
                        stream_error = Some(e);
                        break;
                    }
                }
            }
        } else {
            match provider.generate(&turn_ctx, request).await {
                Ok(response) => {
                    if let Some(u) = response.usage {
                        usage.add(u);
                    }
                    if !response.model.is_empty() {
                        model_used = Some(response.model.clone());
                    }
                    for choice in &response.choices {
                        if !choice.content.is_empty() {
                            content = choice.content.clone();
                        }
                        for step in planner::extend_plan_from_choice(&mut plan, choice) {
                            scheduler.schedule(step);
                        }
                    }
                }
                Err(e) => stream_error = Some(e),
            }
        }

        // ── Plan from content (no structured tool calls) ─────────────
        if plan.steps.is_empty() && !content.is_empty() {
            planner::extend_plan_from_content(&mut plan, &content);
            plan.refine();
            for step in plan.steps.clone() {
                scheduler.schedule(step);
            }
        } else {
            plan.refine();
        }
        if std::env::var(ENV_SCHEDULER_DEBUG).is_ok() {
            tracing::debug!(
                steps = plan.steps.len(),
                elicitation = plan.elicitation.is_some(),
                "assembled plan"
            );
        }

        // ── Elicitation: surfaced, not executed ──────────────────────
        if let Some(elicitation) = &plan.elicitation {
            let mut message = Message::new(
                uuid::Uuid::new_v4().to_string(),
                input.conversation_id.clone(),
                turn_id.clone(),
                user_message_id.clone(),
                Role::Assistant,
                MessageKind::Text,
            );
            message.content = elicitation.prompt.clone();
            message.elicitation_id = Some(elicitation.id.clone());
            message.interim = true;
            self.store
                .patch_message(&turn_ctx, MessagePatch::from(message))
                .await?;
        }

        // ── Join scheduled steps ─────────────────────────────────────
        let first_tool_error = scheduler.wait().await;

        // ── Finalize: assistant message, model call, turn status ─────
        let fctx = if turn_ctx.is_cancelled() {
            turn_ctx.background()
        } else {
            turn_ctx.clone()
        };

        if !content.is_empty() {
            let mut message = Message::new(
                uuid::Uuid::new_v4().to_string(),
                input.conversation_id.clone(),
                turn_id.clone(),
                user_message_id.clone(),
                Role::Assistant,
                MessageKind::Text,
            );
            message.content = content.clone();
            self.store
                .patch_message(&fctx, MessagePatch::from(message))
                .await?;
        }

        let response_payload = Payload::inline(
            uuid::Uuid::new_v4().to_string(),
            PayloadKind::ModelResponse,
            "text/plain",
            content.clone().into_bytes(),
        );
        let response_payload_id = response_payload.id.clone();
        self.store
            .patch_payload(&fctx, PayloadPatch::from(response_payload))
            .await?;

        let status = if let Some(e) = stream_error.as_ref().or(first_tool_error.as_ref()) {
            if e.is_cancellation() {
                TurnStatus::Canceled
            } else {
                TurnStatus::Failed
            }
        } else if turn_ctx.is_cancelled() {
            TurnStatus::Canceled
        } else {
            TurnStatus::Completed
        };
        let error_text = stream_error
            .as_ref()
            .or(first_tool_error.as_ref())
            .map(ToString::to_string);

        let mut model_completion = ModelCallPatch {
            message_id: turn_id.clone(),
            ..Default::default()
        };
        model_completion.status = Some(match status {
            TurnStatus::Completed => ToolCallStatus::Completed,
            TurnStatus::Canceled => ToolCallStatus::Canceled,
            _ => ToolCallStatus::Failed,
        });
        model_completion.response_payload_id = Some(response_payload_id);
        model_completion.prompt_tokens = Some(usage.prompt_tokens);
        model_completion.completion_tokens = Some(usage.completion_tokens);
        model_completion.completed_at = Some(Utc::now());
        self.store
            .patch_model_call(&fctx, model_completion)
            .await?;

        let mut turn_completion = TurnPatch::new(&turn_id);
        turn_completion.status = Some(status);
        turn_completion.ended_at = Some(Utc::now());
        self.store.patch_turn(&fctx, turn_completion).await?;

        let mut conversation_completion = ConversationPatch::new(&input.conversation_id);
        conversation_completion.status = Some(status);
        self.store
            .patch_conversations(&fctx, &[conversation_completion])
            .await?;

        let outcome = TurnOutcome {
            turn_id,
            conversation_id: input.conversation_id.clone(),
            agent_id: agent.id.clone(),
            status,
            content,
            usage,
            model: model_used,
            error: error_text,
            elicitation: plan.elicitation.clone(),
            user_id: input.user_id.clone(),
            context: input.context.clone(),
        };

        // ── Chains ───────────────────────────────────────────────────
        if !agent.chains.is_empty() {
            let scope = turn_ctx.chain().cloned().unwrap_or_default();
            let chain_ctx = turn_ctx.with_chain(scope);
            let evaluator = ChainEvaluator::new(self.store.clone(), self.providers.clone());
            let runner: Arc<dyn TurnRunner> = Arc::new(self.clone());
            evaluator
                .evaluate(&chain_ctx, &agent, &outcome, runner)
                .await?;
        }

        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl TurnRunner for Orchestrator {
    async fn run(&self, ctx: &ExecContext, input: TurnInput) -> Result<TurnOutcome> {
        self.run_turn(ctx, input).await
    }
}
