//! Chain continuations: agent-declared conditional follow-ups evaluated
//! after a turn completes. Synchronous chains run inline and can propagate
//! errors; async chains run detached and surface errors only as messages.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use ag_domain::config::{AgentConfig, ChainMode, ChainSpec, ConversationPolicy, ExpectKind, OnErrorPolicy};
use ag_domain::context::{ChainControl, ChainScope};
use ag_domain::llm::{ChatMessage, GenerateRequest, ProviderFinder};
use ag_domain::trace::TraceEvent;
use ag_domain::{
    Conversation, Error, ExecContext, Message, MessageKind, Result, Role,
};
use ag_store::{ConversationPatch, ConversationStore, MessagePatch};

use crate::orchestrator::{TurnInput, TurnOutcome, TurnRunner};
use crate::planner;
use crate::template;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChainEvaluator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct ChainEvaluator {
    store: Arc<dyn ConversationStore>,
    providers: Arc<dyn ProviderFinder>,
}

impl ChainEvaluator {
    pub fn new(store: Arc<dyn ConversationStore>, providers: Arc<dyn ProviderFinder>) -> Self {
        Self { store, providers }
    }

    /// Evaluate every chain declared on the agent against the completed
    /// turn. The context is expected to carry the [`ChainScope`] whose
    /// control limits per-chain depth across continuation turns.
    pub async fn evaluate(
        &self,
        ctx: &ExecContext,
        agent: &AgentConfig,
        outcome: &TurnOutcome,
        runner: Arc<dyn TurnRunner>,
    ) -> Result<()> {
        if agent.chains.is_empty() {
            return Ok(());
        }
        let control = ctx
            .chain()
            .map(|scope| scope.control.clone())
            .unwrap_or_default();
        let conversation = self
            .store
            .get_conversation(ctx, &outcome.conversation_id)
            .await?;
        let binding = build_binding(agent, outcome, conversation.as_ref());

        for (index, chain) in agent.chains.iter().enumerate() {
            match chain.mode {
                ChainMode::Sync => {
                    self.evaluate_one(
                        ctx,
                        agent,
                        outcome,
                        conversation.as_ref(),
                        &binding,
                        index,
                        chain,
                        &control,
                        runner.clone(),
                    )
                    .await?;
                }
                ChainMode::Async => {
                    let evaluator = self.clone();
                    let ctx = ctx.background();
                    let agent = agent.clone();
                    let outcome = outcome.clone();
                    let conversation = conversation.clone();
                    let binding = binding.clone();
                    let chain = chain.clone();
                    let control = control.clone();
                    let runner = runner.clone();
                    tokio::spawn(async move {
                        // Detached: errors reach the parent only via
                        // `on_error = message`, which evaluate_one handles.
                        let result = evaluator
                            .evaluate_one(
                                &ctx,
                                &agent,
                                &outcome,
                                conversation.as_ref(),
                                &binding,
                                index,
                                &chain,
                                &control,
                                runner,
                            )
                            .await;
                        if let Err(e) = result {
                            tracing::warn!(chain_index = index, error = %e, "async chain failed");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_one(
        &self,
        ctx: &ExecContext,
        agent: &AgentConfig,
        outcome: &TurnOutcome,
        conversation: Option<&Conversation>,
        binding: &Value,
        index: usize,
        chain: &ChainSpec,
        control: &ChainControl,
        runner: Arc<dyn TurnRunner>,
    ) -> Result<()> {
        let target = chain.target.agent_id.clone();
        let mut fired = false;
        let mut reason = String::new();

        let run = async {
            // 1. Status selector.
            if !chain.matches_status(outcome.status.as_str()) {
                reason = format!("status {} not selected", outcome.status.as_str());
                return Ok(());
            }

            // 2. `when` condition.
            match self.when_passes(ctx, agent, chain, binding, outcome, conversation).await {
                Ok(true) => {}
                Ok(false) => {
                    reason = "when condition false".into();
                    return Ok(());
                }
                Err(e) => {
                    reason = format!("when evaluation failed: {e}");
                    tracing::warn!(chain_index = index, error = %e, "chain when failed");
                    return Ok(());
                }
            }

            // 3. Depth limit.
            if !control.try_enter(
                &outcome.conversation_id,
                index,
                &target,
                chain.limits.max_depth,
            ) {
                reason = format!("depth limit {} reached", chain.limits.max_depth);
                return Ok(());
            }
            let depth = control.depth(&outcome.conversation_id, index, &target);
            fired = true;

            // 4. Destination conversation. `link` creates a fresh child;
            // transcript cloning is intentionally skipped.
            let child_conversation_id = match chain.conversation {
                ConversationPolicy::Link => {
                    let child_id = uuid::Uuid::new_v4().to_string();
                    let mut patch = ConversationPatch::new(&child_id);
                    patch.parent_id = Some(outcome.conversation_id.clone());
                    patch.default_model =
                        conversation.and_then(|c| c.default_model.clone());
                    patch.metadata = Some(json!({
                        "chain": {"parentTurnId": outcome.turn_id, "index": index},
                    }));
                    self.store.patch_conversations(ctx, &[patch]).await?;
                    child_id
                }
                ConversationPolicy::Reuse => outcome.conversation_id.clone(),
            };

            // 5. Child input.
            let rendered_query = template::render(&chain.query, binding);
            let child_query = if rendered_query.trim().is_empty() {
                outcome.content.clone()
            } else {
                rendered_query
            };
            let mut child_context: HashMap<String, Value> = outcome.context.clone();
            for (key, value) in &chain.context {
                child_context.insert(key.clone(), value.clone());
            }
            child_context.insert("chain.parentTurnId".into(), json!(outcome.turn_id));
            child_context.insert("chain.targetAgentId".into(), json!(target));

            // 6. Placeholder "chaining" message on the parent turn.
            self.publish_chaining_message(ctx, outcome, chain, &child_conversation_id, &child_query)
                .await?;

            // 7. Run the child.
            let child_scope = ChainScope {
                control: control.clone(),
                resume: false,
                depth,
                parent_turn_id: Some(outcome.turn_id.clone()),
                target_agent_id: Some(target.clone()),
            };
            let child_input = TurnInput {
                conversation_id: child_conversation_id,
                agent_id: target.clone(),
                query: child_query,
                user_id: outcome.user_id.clone(),
                model: None,
                context: child_context,
            };
            let child = runner.run(&ctx.with_chain(child_scope), child_input).await;

            match child {
                Ok(child) if chain.publish.auto_next_turn && !child.content.is_empty() => {
                    if self.dedupe_suppressed(ctx, chain, binding, outcome).await? {
                        reason = "dedupe key already seen".into();
                        return Ok(());
                    }
                    // Continuation turn on the parent conversation.
                    let resume_scope = ChainScope {
                        control: control.clone(),
                        resume: true,
                        depth: depth + 1,
                        parent_turn_id: Some(outcome.turn_id.clone()),
                        target_agent_id: Some(target.clone()),
                    };
                    let mut resume_context = outcome.context.clone();
                    resume_context.insert("chain.resume".into(), json!(true));
                    resume_context.insert("chain.depth".into(), json!(depth + 1));
                    resume_context.insert("chain.parentTurnId".into(), json!(outcome.turn_id));
                    resume_context.insert("chain.targetAgentId".into(), json!(target));
                    let resume_input = TurnInput {
                        conversation_id: outcome.conversation_id.clone(),
                        agent_id: agent.id.clone(),
                        query: child.content,
                        user_id: outcome.user_id.clone(),
                        model: None,
                        context: resume_context,
                    };
                    if let Err(e) = runner.run(&ctx.with_chain(resume_scope), resume_input).await {
                        return self.apply_on_error(ctx, chain, outcome, e).await;
                    }
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => self.apply_on_error(ctx, chain, outcome, e).await,
            }
        }
        .await;

        TraceEvent::ChainEvaluated {
            conversation_id: outcome.conversation_id.clone(),
            chain_index: index,
            target_agent_id: target,
            fired,
            reason,
        }
        .emit();
        run
    }

    async fn when_passes(
        &self,
        ctx: &ExecContext,
        agent: &AgentConfig,
        chain: &ChainSpec,
        binding: &Value,
        outcome: &TurnOutcome,
        conversation: Option<&Conversation>,
    ) -> Result<bool> {
        let Some(when) = &chain.when else {
            return Ok(true);
        };
        if let Some(expr) = &when.expr {
            return Ok(template::truthy(&template::render(expr, binding)));
        }
        let Some(llm) = &when.llm else {
            return Ok(true);
        };

        // Model priority: when-spec > parent output > conversation default >
        // agent model.
        let model = llm
            .model
            .clone()
            .or_else(|| outcome.model.clone())
            .or_else(|| conversation.and_then(|c| c.default_model.clone()))
            .or_else(|| agent.model.clone());
        let provider = self.providers.find(ctx, model.as_deref()).await?;
        let prompt = template::render(&llm.prompt, binding);
        let response = provider
            .generate(
                ctx,
                GenerateRequest {
                    messages: vec![ChatMessage::user(prompt)],
                    tools: Vec::new(),
                    model,
                    mode: Some("chain".into()),
                },
            )
            .await?;
        let text = response
            .choices
            .first()
            .map(|c| c.content.clone())
            .unwrap_or_default();

        match llm.expect.kind {
            ExpectKind::Regex => {
                let pattern = llm.expect.pattern.as_deref().unwrap_or_default();
                let regex = regex::Regex::new(pattern)
                    .map_err(|e| Error::validation(format!("chain regex: {e}")))?;
                Ok(regex.is_match(&text))
            }
            ExpectKind::Jsonpath => {
                let path = llm.expect.path.as_deref().unwrap_or("$");
                let parsed: Value = planner::extract_json_block(&text)
                    .and_then(|block| serde_json::from_str(block).ok())
                    .unwrap_or(Value::Null);
                Ok(template::jsonpath(&parsed, path)
                    .map(|v| template::value_truthy(&v))
                    .unwrap_or(false))
            }
            ExpectKind::Boolean => Ok(template::truthy(&text)),
        }
    }

    /// True when the chain's rendered dedupe key was already recorded for
    /// this conversation; records it otherwise.
    async fn dedupe_suppressed(
        &self,
        ctx: &ExecContext,
        chain: &ChainSpec,
        binding: &Value,
        outcome: &TurnOutcome,
    ) -> Result<bool> {
        let Some(template_key) = chain
            .limits
            .dedupe_key
            .as_deref()
            .filter(|k| !k.is_empty())
        else {
            return Ok(false);
        };
        let key = template::render(template_key, binding);
        if key.is_empty() {
            return Ok(false);
        }

        let conversation = self
            .store
            .get_conversation(ctx, &outcome.conversation_id)
            .await?;
        let mut metadata = conversation
            .map(|c| c.metadata)
            .filter(|m| m.is_object())
            .unwrap_or_else(|| json!({}));
        let seen = metadata
            .get("chainSeen")
            .and_then(Value::as_array)
            .map(|list| list.iter().any(|v| v.as_str() == Some(key.as_str())))
            .unwrap_or(false);
        if seen {
            return Ok(true);
        }

        if let Some(entry) = metadata.as_object_mut() {
            let seen_list = entry
                .entry("chainSeen")
                .or_insert_with(|| Value::Array(Vec::new()));
            match seen_list {
                Value::Array(list) => list.push(json!(key)),
                other => *other = json!([key]),
            }
        }
        let mut patch = ConversationPatch::new(&outcome.conversation_id);
        patch.metadata = Some(metadata);
        self.store.patch_conversations(ctx, &[patch]).await?;
        Ok(false)
    }

    async fn publish_chaining_message(
        &self,
        ctx: &ExecContext,
        outcome: &TurnOutcome,
        chain: &ChainSpec,
        child_conversation_id: &str,
        child_query: &str,
    ) -> Result<()> {
        let mut message = Message::new(
            uuid::Uuid::new_v4().to_string(),
            outcome.conversation_id.clone(),
            outcome.turn_id.clone(),
            outcome.turn_id.clone(),
            parse_role(&chain.publish.role),
            MessageKind::Text,
        );
        message.mode = Some("chain".into());
        message.actor = Some(chain.publish.name.clone());
        message.content = child_query.to_owned();
        message.linked_conversation_id = Some(child_conversation_id.to_owned());
        message.interim = true;
        self.store
            .patch_message(ctx, MessagePatch::from(message))
            .await
    }

    async fn apply_on_error(
        &self,
        ctx: &ExecContext,
        chain: &ChainSpec,
        outcome: &TurnOutcome,
        error: Error,
    ) -> Result<()> {
        match chain.on_error {
            OnErrorPolicy::Propagate => Err(error),
            OnErrorPolicy::Message => {
                let mut message = Message::new(
                    uuid::Uuid::new_v4().to_string(),
                    outcome.conversation_id.clone(),
                    outcome.turn_id.clone(),
                    outcome.turn_id.clone(),
                    Role::System,
                    MessageKind::Text,
                );
                message.mode = Some("chain".into());
                message.actor = Some(chain.publish.name.clone());
                message.content = format!("chain {} failed: {error}", chain.target.agent_id);
                self.store
                    .patch_message(ctx, MessagePatch::from(message))
                    .await?;
                Ok(())
            }
            OnErrorPolicy::Ignore => {
                tracing::debug!(error = %error, "chain error ignored");
                Ok(())
            }
        }
    }
}

fn parse_role(role: &str) -> Role {
    match role {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        "tool" => Role::Tool,
        "control" => Role::Control,
        _ => Role::User,
    }
}

/// Binding exposed to chain templates: parent output, usage, context map,
/// agent identity, turn metadata, and conversation metadata.
pub fn build_binding(
    agent: &AgentConfig,
    outcome: &TurnOutcome,
    conversation: Option<&Conversation>,
) -> Value {
    json!({
        "output": {
            "content": outcome.content,
            "model": outcome.model,
            "error": outcome.error,
        },
        "usage": {
            "prompt_tokens": outcome.usage.prompt_tokens,
            "completion_tokens": outcome.usage.completion_tokens,
            "total_tokens": outcome.usage.total_tokens,
        },
        "context": outcome.context,
        "agent": {"id": agent.id, "model": agent.model},
        "turn": {
            "id": outcome.turn_id,
            "status": outcome.status.as_str(),
            "conversationId": outcome.conversation_id,
        },
        "conversation": {
            "id": outcome.conversation_id,
            "metadata": conversation.map(|c| c.metadata.clone()).unwrap_or(Value::Null),
        },
    })
}
