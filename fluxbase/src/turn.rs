//! The single entry point a transport layer calls to run one chat turn
//! (spec §2 "Data flow for a chat turn").
//!
//! Auth, quota gating ahead of the call, and streaming the reply back to
//! the caller are transport concerns (spec §1 non-goals); this function
//! covers everything from "bot descriptor in hand" through "assistant
//! reply plus audit trail out" — settings-template expansion, retrieval,
//! and the multi-round tool-call loop, in that order.

use fluxbase_botconfig::ChatbotConfig;
use fluxbase_executor::{ChatOutcome, Executor, ExecutorError};
use fluxbase_settings::SettingsBackend;
use neuron_turn::provider::Provider;

/// Run one chat turn for `config` through `executor`.
///
/// `caller_id` drives rate limiting, daily budgets, and `{{user:key}}`
/// settings resolution; `session_id` keys conversation persistence when
/// the bot has `persist_conversations` enabled. This is a thin forwarding
/// wrapper — callers that want finer control (custom audit sinks, a
/// different retrieval source per call) should build an [`Executor`]
/// directly and call [`Executor::run`].
pub async fn handle_chat_turn<P: Provider, B: SettingsBackend>(
    executor: &Executor<P, B>,
    config: &ChatbotConfig,
    message: &str,
    caller_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<ChatOutcome, ExecutorError> {
    executor.run(config, message, caller_id, session_id).await
}
