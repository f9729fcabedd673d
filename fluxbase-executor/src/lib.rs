#![deny(missing_docs)]
//! The chat-turn loop: load a bot descriptor, gate on usage, resolve
//! settings templates, inject retrieved context, then run up to
//! `max_turns` rounds of provider call / tool dispatch (spec §4.8).
//!
//! Generalizes `neuron-op-react`'s `ReactOperator` Reason-Act-Observe
//! cycle: same hook points (`PreInference`/`PostInference`/`PreToolUse`/
//! `PostToolUse`/`ExitCheck`), same tool-call/result message shape, same
//! exit bookkeeping — but driven by a `ChatbotConfig` rather than a
//! static `ReactConfig`, gated by [`ratelimit::UsageGate`] before any
//! provider call is made, and with the fixed `fluxbase_catalog` as the
//! whitelist/scope source of truth instead of a caller-supplied tool list.

pub mod ratelimit;
pub mod retrieval;
pub mod summary;

use fluxbase_botconfig::ChatbotConfig;
use fluxbase_settings::{SettingsBackend, SettingsError, SettingsResolver};
use layer0::effect::Scope as StateScope;
use layer0::hook::{HookAction, HookContext, HookPoint};
use layer0::state::StateStore;
use neuron_hooks::HookRegistry;
use neuron_tool::fluxbase_catalog;
use neuron_tool::{ToolError, ToolRegistry};
use neuron_turn::provider::{Provider, ProviderError};
use neuron_turn::types::{ContentPart, ProviderMessage, ProviderRequest, ProviderResponse, Role, StopReason, ToolSchema};
use ratelimit::{UsageError, UsageGate};
use retrieval::{render_context_message, NoRetrieval, RetrievalSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The loop's default round ceiling, used when a bot's `max-turns`
/// annotation is absent.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// The default per-tool-call timeout (spec §4.8: "`Executor.timeout`
/// (default 30s)").
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// The row cap applied to tabular tool results before they're summarized
/// into the model's context, absent a bot-specific override.
pub const DEFAULT_MAX_ROWS: usize = 50;

/// Bound on provider-call attempts for transient failures (spec §5:
/// "retried with exponential backoff up to a small bound (e.g. 3 attempts)").
const MAX_PROVIDER_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff between retries, doubling each
/// attempt (100ms, 200ms, ...).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Calls `provider.complete(request)` with bounded exponential backoff:
/// `ProviderError::is_retryable` failures (rate limits, network/5xx) are
/// retried up to [`MAX_PROVIDER_ATTEMPTS`] times total, waiting
/// `RETRY_BASE_DELAY * 2^n` between attempts. Validation/auth errors are
/// never retryable and surface on the first attempt.
async fn complete_with_retry<P: Provider>(
    provider: &P,
    request: &ProviderRequest,
) -> Result<ProviderResponse, ProviderError> {
    let mut attempt = 0u32;
    loop {
        match provider.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_PROVIDER_ATTEMPTS => {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors from running a chat turn.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The caller exceeded a rate limit or daily budget (spec §5: "may
    /// reject with a typed error the boundary surfaces as HTTP 429").
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Settings-template resolution failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Retrieval failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The bot has `required-settings` that did not resolve to a value.
    #[error("required settings unresolved: {0:?}")]
    RequiredSettingsUnresolved(Vec<String>),

    /// The bot is disabled and cannot accept turns.
    #[error("chatbot {0:?} is disabled")]
    Disabled(String),

    /// The model produced truncated output (hit `max_tokens`).
    #[error("output truncated at max_tokens")]
    MaxTokens,

    /// The provider's safety filter rejected the content.
    #[error("content filtered by provider")]
    ContentFiltered,
}

/// Why the tool-call loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The model produced a final response with no further tool calls.
    Complete,
    /// `max_turns` rounds were exhausted.
    MaxTurns,
    /// A hook halted the turn (`HookAction::Halt`).
    ObserverHalt,
}

/// Whether a tool call was allowed to run, for [`AuditRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    /// The call was whitelisted and executed.
    Allowed,
    /// The call was rejected before execution, and why.
    Rejected(String),
}

/// One tool invocation's outcome, recorded for the per-turn audit trail
/// (spec §4.8: "per-iteration audit record"; suppressed at the caller's
/// option via `ChatbotConfig.disable_execution_logs`).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Which round of the loop this call happened in (1-indexed).
    pub iteration: u32,
    /// The tool name the model requested.
    pub tool_name: String,
    /// Whether the call was allowed to run.
    pub verdict: ValidationVerdict,
    /// Wall-clock time the call took. Zero for rejected calls.
    pub duration: Duration,
    /// Number of rows returned, when the result was tabular.
    pub rows_returned: Option<usize>,
}

/// The final result of a completed chat turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The assistant's final reply content parts.
    pub content: Vec<ContentPart>,
    /// Why the loop stopped.
    pub exit_reason: ExitReason,
    /// Total rounds run.
    pub turns_used: u32,
    /// Input + output tokens across all rounds.
    pub tokens_used: u64,
    /// Per-call audit trail, in order. Empty when
    /// `disable_execution_logs` is set.
    pub audit: Vec<AuditRecord>,
}

/// Runs the Reason-Act-Observe loop for one chat turn against a
/// [`ChatbotConfig`]. Generic over `P: Provider` (RPITIT, not
/// object-safe) and `B: SettingsBackend`.
pub struct Executor<P: Provider, B: SettingsBackend> {
    provider: P,
    tools: ToolRegistry,
    hooks: HookRegistry,
    settings: SettingsResolver<B>,
    usage: UsageGate,
    retrieval: Arc<dyn RetrievalSource>,
    state: Option<Arc<dyn StateStore>>,
    tool_timeout: Duration,
    max_rows: usize,
}

impl<P: Provider, B: SettingsBackend> Executor<P, B> {
    /// Build an Executor with no retrieval source and no conversation
    /// persistence — the minimal configuration a bot with an empty
    /// `knowledge_bases` list and `persist_conversations: false` needs.
    pub fn new(provider: P, tools: ToolRegistry, hooks: HookRegistry, settings: SettingsResolver<B>) -> Self {
        Self {
            provider,
            tools,
            hooks,
            settings,
            usage: UsageGate::new(),
            retrieval: Arc::new(NoRetrieval),
            state: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Wire a retrieval source, replacing [`NoRetrieval`].
    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalSource>) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Wire conversation persistence. Only consulted when
    /// `ChatbotConfig.persist_conversations` is `Some(true)` and a
    /// session id is supplied to [`Executor::run`].
    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Override the per-tool-call timeout and tabular-result row cap.
    pub fn with_limits(mut self, tool_timeout: Duration, max_rows: usize) -> Self {
        self.tool_timeout = tool_timeout;
        self.max_rows = max_rows;
        self
    }

    async fn load_history(&self, session_id: &str, config: &ChatbotConfig) -> Vec<ProviderMessage> {
        if config.persist_conversations != Some(true) {
            return Vec::new();
        }
        let Some(state) = &self.state else { return Vec::new() };
        let scope = StateScope::Session(layer0::id::SessionId::new(session_id));
        match state.read(&scope, "messages").await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    async fn persist_history(&self, session_id: &str, config: &ChatbotConfig, messages: &[ProviderMessage]) {
        if config.persist_conversations != Some(true) {
            return;
        }
        let Some(state) = &self.state else { return };
        let scope = StateScope::Session(layer0::id::SessionId::new(session_id));
        let value = serde_json::to_value(messages).unwrap_or(serde_json::Value::Null);
        let _ = state.write(&scope, "messages", value).await;
    }

    /// The tool schemas the model is offered this turn: the catalog,
    /// derived-scope filtered against `config.mcp_tools`, dual-shaped per
    /// `config.use_mcp_schema` — but surfaced here as the provider-facing
    /// [`ToolSchema`] list `ProviderRequest.tools` expects (spec §4.6's
    /// flat/function-wrapped distinction matters to callers that emit raw
    /// JSON to an external MCP client, not to this internal lingua
    /// franca, which is already the flat shape).
    fn build_tool_schemas(&self, config: &ChatbotConfig) -> Vec<ToolSchema> {
        let whitelist = &config.mcp_tools;
        fluxbase_catalog::CATALOG
            .iter()
            .filter(|desc| whitelist.iter().any(|w| w == desc.name))
            .filter_map(|desc| {
                self.tools.get(desc.name).map(|tool| ToolSchema {
                    name: desc.name.to_string(),
                    description: desc.description.to_string(),
                    input_schema: tool.input_schema(),
                })
            })
            .collect()
    }

    fn missing_required_settings(&self, config: &ChatbotConfig, resolved: &[(String, bool)]) -> Vec<String> {
        config
            .required_settings
            .iter()
            .filter(|key| {
                resolved
                    .iter()
                    .any(|(k, ok)| k == key.as_str() && !*ok)
            })
            .cloned()
            .collect()
    }

    async fn check_required_settings(&self, config: &ChatbotConfig, caller_id: Option<&str>) -> Result<(), ExecutorError> {
        if config.required_settings.is_empty() {
            return Ok(());
        }
        let mut resolved = Vec::with_capacity(config.required_settings.len());
        for key in &config.required_settings {
            let value = self.settings.resolve_key(None, key, caller_id).await?;
            resolved.push((key.clone(), value.is_some()));
        }
        let missing = self.missing_required_settings(config, &resolved);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::RequiredSettingsUnresolved(missing))
        }
    }

    fn build_hook_context(&self, point: HookPoint, tokens_used: u64, turns_completed: u32, elapsed: Duration) -> HookContext {
        let mut ctx = HookContext::new(point);
        ctx.tokens_used = tokens_used;
        ctx.turns_completed = turns_completed;
        ctx.elapsed = elapsed.into();
        ctx
    }

    /// Run one chat turn: the caller's `message` is appended to whatever
    /// history is loaded (or empty, for a stateless bot), then the
    /// Reason-Act-Observe loop runs until the model stops calling tools,
    /// `max_turns` is hit, or a hook halts it.
    ///
    /// `caller_id` identifies the caller for rate limiting, daily budget
    /// tracking, and `{{user:key}}` settings resolution; `session_id`
    /// keys conversation persistence when the bot has it enabled.
    pub async fn run(
        &self,
        config: &ChatbotConfig,
        message: &str,
        caller_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ChatOutcome, ExecutorError> {
        if !config.enabled {
            return Err(ExecutorError::Disabled(config.name.clone()));
        }

        let caller_key = caller_id.unwrap_or("anonymous");
        self.usage
            .check_and_consume_request(caller_key, config.rate_limit_per_minute, config.daily_request_limit)?;

        self.check_required_settings(config, caller_id).await?;

        let system_prompt = self.settings.resolve_template(&config.system_prompt, caller_id).await?;

        let context = self.retrieval.retrieve(config, message, caller_id).await?;
        let context_message = render_context_message(&context);

        let mut system = system_prompt;
        if !context_message.is_empty() {
            system.push_str("\n\n");
            system.push_str(&context_message);
        }

        let mut messages = match session_id {
            Some(id) => self.load_history(id, config).await,
            None => Vec::new(),
        };
        messages.push(ProviderMessage {
            role: Role::User,
            content: vec![ContentPart::Text { text: message.to_string() }],
        });

        let tools = self.build_tool_schemas(config);
        let max_turns = config.max_turns.unwrap_or(DEFAULT_MAX_TURNS).max(1);
        let start = Instant::now();

        let mut turns_used = 0u32;
        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;
        let mut last_content: Vec<ContentPart> = Vec::new();
        let mut audit = Vec::new();

        let outcome = loop {
            turns_used += 1;

            let hook_ctx = self.build_hook_context(HookPoint::PreInference, tokens_in + tokens_out, turns_used - 1, start.elapsed());
            if let HookAction::Halt { .. } = self.hooks.dispatch(&hook_ctx).await {
                break ExitReason::ObserverHalt;
            }

            let request = ProviderRequest {
                model: config.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                system: Some(system.clone()),
                extra: serde_json::Value::Null,
            };
            let response = complete_with_retry(&self.provider, &request).await?;

            tokens_in += response.usage.input_tokens;
            tokens_out += response.usage.output_tokens;
            last_content = response.content.clone();

            let hook_ctx = self.build_hook_context(HookPoint::PostInference, tokens_in + tokens_out, turns_used, start.elapsed());
            if let HookAction::Halt { .. } = self.hooks.dispatch(&hook_ctx).await {
                break ExitReason::ObserverHalt;
            }

            match response.stop_reason {
                StopReason::MaxTokens => return Err(ExecutorError::MaxTokens),
                StopReason::ContentFilter => return Err(ExecutorError::ContentFiltered),
                StopReason::EndTurn => break ExitReason::Complete,
                StopReason::ToolUse => {}
            }

            messages.push(ProviderMessage { role: Role::Assistant, content: response.content.clone() });

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse { id, name, input } => Some((id.clone(), name.clone(), input.clone())),
                    _ => None,
                })
                .collect();

            let mut tool_results = Vec::with_capacity(tool_uses.len());
            for (id, name, input) in tool_uses {
                let (content, is_error, record) = self.dispatch_tool_call(config, &name, input, turns_used, start.elapsed()).await;
                audit.push(record);
                tool_results.push(ContentPart::ToolResult { tool_use_id: id, content, is_error });
            }
            messages.push(ProviderMessage { role: Role::User, content: tool_results });

            if turns_used >= max_turns {
                break ExitReason::MaxTurns;
            }

            let hook_ctx = self.build_hook_context(HookPoint::ExitCheck, tokens_in + tokens_out, turns_used, start.elapsed());
            if let HookAction::Halt { .. } = self.hooks.dispatch(&hook_ctx).await {
                break ExitReason::ObserverHalt;
            }
        };

        if let Some(id) = session_id {
            self.persist_history(id, config, &messages).await;
        }

        let total_tokens = tokens_in + tokens_out;
        let _ = self.usage.record_tokens(caller_key, total_tokens, config.daily_token_budget);

        let audit = if config.disable_execution_logs == Some(true) { Vec::new() } else { audit };

        Ok(ChatOutcome {
            content: last_content,
            exit_reason: outcome,
            turns_used,
            tokens_used: total_tokens,
            audit,
        })
    }

    async fn dispatch_tool_call(
        &self,
        config: &ChatbotConfig,
        name: &str,
        input: serde_json::Value,
        iteration: u32,
        elapsed: Duration,
    ) -> (String, bool, AuditRecord) {
        if !config.mcp_tools.iter().any(|t| t == name) {
            let reason = format!("{name} is not in this bot's whitelist");
            return (
                reason.clone(),
                true,
                AuditRecord {
                    iteration,
                    tool_name: name.to_string(),
                    verdict: ValidationVerdict::Rejected(reason),
                    duration: Duration::ZERO,
                    rows_returned: None,
                },
            );
        }

        let mut actual_input = input;
        let mut hook_ctx = self.build_hook_context(HookPoint::PreToolUse, 0, iteration, elapsed);
        hook_ctx.tool_name = Some(name.to_string());
        hook_ctx.tool_input = Some(actual_input.clone());
        match self.hooks.dispatch(&hook_ctx).await {
            HookAction::Halt { reason } | HookAction::SkipTool { reason } => {
                return (
                    format!("skipped: {reason}"),
                    false,
                    AuditRecord {
                        iteration,
                        tool_name: name.to_string(),
                        verdict: ValidationVerdict::Rejected(reason),
                        duration: Duration::ZERO,
                        rows_returned: None,
                    },
                );
            }
            HookAction::ModifyToolInput { new_input } => actual_input = new_input,
            _ => {}
        }

        let tool_start = Instant::now();
        let call = match self.tools.get(name) {
            Some(tool) => tokio::time::timeout(self.tool_timeout, tool.call(actual_input)).await,
            None => return self.not_found_record(name, iteration),
        };
        let duration = tool_start.elapsed();

        let result = match call {
            Ok(result) => result,
            Err(_) => {
                return (
                    "tool call timed out".to_string(),
                    true,
                    AuditRecord {
                        iteration,
                        tool_name: name.to_string(),
                        verdict: ValidationVerdict::Allowed,
                        duration: self.tool_timeout,
                        rows_returned: None,
                    },
                );
            }
        };

        let (content, is_error, rows_returned) = match result {
            Ok(mut value) => {
                let rows_returned = self.cap_rows(config, name, &mut value);
                (serde_json::to_string(&value).unwrap_or_default(), false, rows_returned)
            }
            Err(e) => (e.to_string(), true, None),
        };

        let mut hook_ctx = self.build_hook_context(HookPoint::PostToolUse, 0, iteration, elapsed);
        hook_ctx.tool_name = Some(name.to_string());
        hook_ctx.tool_result = Some(content.clone());
        let content = match self.hooks.dispatch(&hook_ctx).await {
            HookAction::ModifyToolOutput { new_output } => new_output.to_string(),
            _ => content,
        };

        (
            content,
            is_error,
            AuditRecord {
                iteration,
                tool_name: name.to_string(),
                verdict: ValidationVerdict::Allowed,
                duration,
                rows_returned,
            },
        )
    }

    fn not_found_record(&self, name: &str, iteration: u32) -> (String, bool, AuditRecord) {
        let err = ToolError::NotFound(name.to_string());
        (
            err.to_string(),
            true,
            AuditRecord {
                iteration,
                tool_name: name.to_string(),
                verdict: ValidationVerdict::Rejected(err.to_string()),
                duration: Duration::ZERO,
                rows_returned: None,
            },
        )
    }

    /// Truncate a tabular tool result's `rows` array to `self.max_rows`
    /// and append a deterministic summary string (spec §4.8), when the
    /// result carries one. Returns the (possibly capped) row count.
    fn cap_rows(&self, config: &ChatbotConfig, tool_name: &str, value: &mut serde_json::Value) -> Option<usize> {
        let obj = value.as_object_mut()?;
        let rows = obj.get("rows")?.as_array()?.clone();
        let tables: Vec<String> = obj
            .get("tables")
            .and_then(|t| t.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_else(|| vec![tool_name.to_string()]);

        let capped = rows.len() > self.max_rows;
        let kept: Vec<serde_json::Value> = if capped { rows[..self.max_rows].to_vec() } else { rows.clone() };
        let cap = if capped { Some(self.max_rows) } else { None };
        let summary_text = summary::summarize_rows(&config.name, &tables, &rows, cap);

        obj.insert("rows".to_string(), serde_json::Value::Array(kept.clone()));
        obj.insert("summary".to_string(), serde_json::Value::String(summary_text));
        Some(kept.len())
    }
}
