//! Tool-step execution: message and tool-call lifecycle, payload
//! persistence, bounded retry, timeout, redaction, and overflow wrapping.
//! Finalization writes survive outer cancellation by switching to a
//! detached context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use ag_domain::plan::Step;
use ag_domain::tool::{ToolOutcome, ToolRegistry};
use ag_domain::trace::TraceEvent;
use ag_domain::workspace::ENV_TOOLCALL_TIMEOUT;
use ag_domain::{
    Error, ExecContext, Message, MessageKind, Payload, PayloadKind, Result, Role, ToolCall,
    ToolCallStatus, TurnMeta, TurnStatus,
};
use ag_store::{ConversationPatch, ConversationStore, MessagePatch, PayloadPatch, ToolCallPatch};

use crate::overflow;
use crate::redact;
use crate::traces::{TraceKind, TraceRecord, TraceStore};

/// Default per-step timeout when neither the context nor the environment
/// overrides it.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(180);

/// Elapsed-time ceiling under which a canceled first attempt is retried.
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Outcome of one executed step as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub message_id: String,
    pub status: ToolCallStatus,
    pub content: String,
    pub error: Option<String>,
}

impl StepResult {
    /// The error that stops further scheduling, when this step carries one.
    pub fn stop_error(&self) -> Option<Error> {
        match self.status {
            ToolCallStatus::Completed | ToolCallStatus::Running => None,
            ToolCallStatus::Canceled => Some(Error::Canceled),
            ToolCallStatus::Failed => Some(Error::Other(
                self.error.clone().unwrap_or_else(|| "tool failed".into()),
            )),
        }
    }
}

pub struct Executor {
    store: Arc<dyn ConversationStore>,
    registry: Arc<dyn ToolRegistry>,
    traces: Arc<TraceStore>,
    retry_budget: Duration,
}

impl Executor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: Arc<dyn ToolRegistry>,
        traces: Arc<TraceStore>,
    ) -> Self {
        Self {
            store,
            registry,
            traces,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Effective step timeout: per-call context value, `AGENTLY_TOOLCALL_TIMEOUT`
    /// seconds, then the three-minute default.
    pub fn effective_timeout(ctx: &ExecContext) -> Duration {
        if let Some(timeout) = ctx.tool_timeout() {
            return timeout;
        }
        if let Some(secs) = std::env::var(ENV_TOOLCALL_TIMEOUT)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            return Duration::from_secs(secs.max(1));
        }
        DEFAULT_TOOL_TIMEOUT
    }

    /// Run one tool step through its full lifecycle. The returned `Err` is
    /// reserved for persistence failures; tool errors come back as a
    /// terminal [`StepResult`].
    pub async fn execute_step(&self, ctx: &ExecContext, step: &Step) -> Result<StepResult> {
        let turn = ctx
            .turn()
            .cloned()
            .ok_or_else(|| Error::validation("step execution requires turn metadata"))?;
        let started = Instant::now();
        let started_at = Utc::now();
        let message_id = uuid::Uuid::new_v4().to_string();
        let trace_id = turn
            .trace_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // 1. Tool message.
        let mut message = Message::new(
            message_id.clone(),
            turn.conversation_id.clone(),
            turn.turn_id.clone(),
            turn.turn_id.clone(),
            Role::Tool,
            MessageKind::ToolOp,
        );
        if ctx.chain_mode() {
            message.mode = Some("chain".into());
        }
        message.created_at = started_at;
        self.store
            .patch_message(ctx, MessagePatch::from(message))
            .await?;

        // 2. Tool-call record in `running`.
        let tool_call = ToolCall {
            message_id: message_id.clone(),
            op_id: step.id.clone(),
            turn_id: turn.turn_id.clone(),
            tool_name: step.name.clone(),
            tool_kind: "general".into(),
            status: ToolCallStatus::Running,
            request_payload_id: None,
            response_payload_id: None,
            error_message: None,
            started_at,
            completed_at: None,
            trace_id: Some(trace_id.clone()),
        };
        self.store
            .patch_tool_call(ctx, ToolCallPatch::from(tool_call))
            .await?;
        self.traces.append(TraceRecord {
            id: trace_id.clone(),
            conversation_id: turn.conversation_id.clone(),
            turn_id: turn.turn_id.clone(),
            kind: TraceKind::ToolCall,
            name: step.name.clone(),
            status: "running".into(),
            error: None,
            started_at,
            ended_at: None,
        });
        TraceEvent::ToolStarted {
            turn_id: turn.turn_id.clone(),
            tool_name: step.name.clone(),
            op_id: step.id.clone(),
        }
        .emit();

        // 3. Request payload.
        let request_payload = Payload::inline(
            uuid::Uuid::new_v4().to_string(),
            PayloadKind::ToolRequest,
            "application/json",
            serde_json::to_vec(&step.args)?,
        );
        let request_payload_id = request_payload.id.clone();
        self.store
            .patch_payload(ctx, PayloadPatch::from(request_payload))
            .await?;
        let mut link = ToolCallPatch::new(&message_id);
        link.request_payload_id = Some(request_payload_id);
        self.store.patch_tool_call(ctx, link).await?;

        // 4. Execute with bounded retry.
        let timeout = Self::effective_timeout(ctx);
        let step_ctx = ctx.with_timeout(timeout);
        let execution = self.run_attempts(ctx, &step_ctx, step, started, timeout).await;

        // 5.–7. Persist the result and finalize. When the outer context was
        // canceled mid-flight the remaining writes use a detached context so
        // the record stays consistent.
        let fctx = if ctx.is_cancelled() {
            ctx.background()
        } else {
            ctx.clone()
        };
        let result = self
            .finalize(&fctx, &turn, step, &message_id, execution)
            .await?;

        TraceEvent::ToolFinished {
            turn_id: turn.turn_id,
            tool_name: step.name.clone(),
            status: format!("{:?}", result.status).to_lowercase(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(result)
    }

    async fn run_attempts(
        &self,
        outer: &ExecContext,
        step_ctx: &ExecContext,
        step: &Step,
        started: Instant,
        timeout: Duration,
    ) -> std::result::Result<ToolOutcome, Error> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let remaining = step_ctx.remaining().unwrap_or(timeout);
            let attempt_result = tokio::select! {
                outcome = tokio::time::timeout(
                    remaining,
                    self.registry.execute(step_ctx, &step.name, &step.args),
                ) => match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::DeadlineExceeded),
                },
                _ = outer.cancelled() => Err(Error::Canceled),
            };

            match attempt_result {
                Ok(outcome) => return Ok(outcome),
                Err(e)
                    if e.is_cancellation()
                        && attempt < 2
                        && !outer.is_cancelled()
                        && started.elapsed() <= self.retry_budget =>
                {
                    tracing::debug!(tool = %step.name, attempt, "retrying canceled attempt");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finalize(
        &self,
        fctx: &ExecContext,
        turn: &TurnMeta,
        step: &Step,
        message_id: &str,
        execution: std::result::Result<ToolOutcome, Error>,
    ) -> Result<StepResult> {
        let completed_at = Utc::now();
        let mut completion = ToolCallPatch::new(message_id);
        completion.completed_at = Some(completed_at);

        let result = match execution {
            Ok(outcome) => {
                let body = self
                    .render_response(fctx, turn, step, message_id, &outcome)
                    .await?;

                // 5. Response payload.
                let response_payload = Payload::inline(
                    uuid::Uuid::new_v4().to_string(),
                    PayloadKind::ToolResponse,
                    "text/plain",
                    body.clone().into_bytes(),
                );
                let response_payload_id = response_payload.id.clone();
                self.store
                    .patch_payload(fctx, PayloadPatch::from(response_payload))
                    .await?;

                let mut message_update = MessagePatch::new(message_id);
                message_update.content = Some(body.clone());
                self.store.patch_message(fctx, message_update).await?;

                completion.status = Some(ToolCallStatus::Completed);
                completion.response_payload_id = Some(response_payload_id);
                StepResult {
                    message_id: message_id.to_owned(),
                    status: ToolCallStatus::Completed,
                    content: body,
                    error: None,
                }
            }
            Err(e) => {
                let status = if e.is_cancellation() {
                    ToolCallStatus::Canceled
                } else {
                    ToolCallStatus::Failed
                };
                completion.status = Some(status);
                completion.error_message = Some(e.to_string());
                StepResult {
                    message_id: message_id.to_owned(),
                    status,
                    content: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        // 7. Completion strictly follows the payload writes.
        self.store.patch_tool_call(fctx, completion).await?;

        let conversation_status = match result.status {
            ToolCallStatus::Completed | ToolCallStatus::Running => TurnStatus::Running,
            ToolCallStatus::Failed => TurnStatus::Failed,
            ToolCallStatus::Canceled => TurnStatus::Canceled,
        };
        let mut conversation = ConversationPatch::new(&turn.conversation_id);
        conversation.status = Some(conversation_status);
        self.store
            .patch_conversations(fctx, &[conversation])
            .await?;

        if let Some(trace_id) = self.trace_id_for(fctx, message_id).await {
            let status = result.status;
            let error = result.error.clone();
            self.traces.update(&turn.conversation_id, &trace_id, |r| {
                r.status = format!("{status:?}").to_lowercase();
                r.error = error;
                r.ended_at = Some(completed_at);
            });
        }
        Ok(result)
    }

    /// Render the stored response body: redaction first, then the overflow
    /// envelope, falling back to the plain content.
    async fn render_response(
        &self,
        fctx: &ExecContext,
        turn: &TurnMeta,
        step: &Step,
        message_id: &str,
        outcome: &ToolOutcome,
    ) -> Result<String> {
        let Some(structured) = &outcome.structured else {
            return Ok(outcome.content.clone());
        };

        // 6. Binary redaction: bytes move into a dedicated payload plus a
        // control attachment parented on the turn id.
        let mut stored: Value = structured.clone();
        if let Some(redaction) = redact::redact_binary(structured, turn) {
            self.store
                .patch_payload(fctx, PayloadPatch::from(redaction.payload))
                .await?;
            self.store
                .patch_message(fctx, MessagePatch::from(redaction.attachment))
                .await?;
            stored = redaction.redacted;
        }

        let definition = self.registry.definition(&step.name);
        if let Some(envelope) = overflow::wrap_overflow(message_id, &stored, definition.as_ref()) {
            return Ok(envelope);
        }
        if stored != *structured {
            return Ok(serde_json::to_string(&stored)?);
        }
        Ok(outcome.content.clone())
    }

    async fn trace_id_for(&self, ctx: &ExecContext, message_id: &str) -> Option<String> {
        self.store
            .get_tool_call(ctx, message_id)
            .await
            .ok()
            .flatten()
            .and_then(|tc| tc.trace_id)
    }
}
