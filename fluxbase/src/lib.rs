#![deny(missing_docs)]
//! # fluxbase — retrieval, tool-orchestration, and safety layer
//!
//! `fluxbase` is the umbrella crate for a multi-tenant RAG chatbot
//! platform's core engine: parse an annotated bot config, ground a turn
//! against one or more knowledge bases, drive an LLM provider through
//! zero or more tool-call rounds, and return an auditable outcome.
//!
//! This crate is a thin composition surface — re-exports behind feature
//! flags, a [`prelude`] for the common path, and [`handle_chat_turn`] as
//! the single call a transport layer needs to run one turn. The actual
//! work lives in the crates it composes: `fluxbase-botconfig` (bot
//! descriptors), `fluxbase-executor` (the tool-call loop),
//! `fluxbase-retriever` (hybrid/graph-boosted search), `fluxbase-kb`
//! (KB/document/chunk persistence), `fluxbase-settings` (`{{scope:key}}`
//! templates), `fluxbase-secrets` (versioned encrypted KV), and
//! `fluxbase-pubsub` (cache-invalidation fan-out).

#[cfg(feature = "core")]
pub use layer0;
#[cfg(feature = "core")]
pub use neuron_context;
#[cfg(feature = "env-local")]
pub use neuron_env_local;
#[cfg(feature = "hooks")]
pub use neuron_hooks;
#[cfg(feature = "mcp")]
pub use neuron_mcp;
#[cfg(feature = "provider-anthropic")]
pub use neuron_provider_anthropic;
#[cfg(feature = "provider-ollama")]
pub use neuron_provider_ollama;
#[cfg(feature = "provider-openai")]
pub use neuron_provider_openai;
#[cfg(feature = "state-memory")]
pub use neuron_state_memory;
#[cfg(feature = "core")]
pub use neuron_tool;
#[cfg(feature = "core")]
pub use neuron_turn;

#[cfg(feature = "core")]
pub use fluxbase_botconfig;
#[cfg(feature = "core")]
pub use fluxbase_executor;
#[cfg(feature = "core")]
pub use fluxbase_settings;

#[cfg(feature = "secrets")]
pub use fluxbase_crypto;
#[cfg(feature = "secrets")]
pub use fluxbase_secrets;

#[cfg(feature = "pubsub")]
pub use fluxbase_pubsub;

#[cfg(feature = "retrieval")]
pub use fluxbase_embedding;
#[cfg(feature = "retrieval")]
pub use fluxbase_filter;
#[cfg(feature = "retrieval")]
pub use fluxbase_ingest;
#[cfg(feature = "retrieval")]
pub use fluxbase_kb;
#[cfg(feature = "retrieval")]
pub use fluxbase_retriever;

#[cfg(feature = "retrieval")]
mod retrieval_source;
#[cfg(feature = "retrieval")]
pub use retrieval_source::ChatbotKnowledgeRetrieval;

#[cfg(feature = "core")]
mod turn;
#[cfg(feature = "core")]
pub use turn::handle_chat_turn;

/// Happy-path imports for running a chat turn end to end.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use layer0::{
        AgentId, Content, ContentBlock, Effect, Environment, ExitReason as OperatorExitReason,
        Hook, HookAction, HookContext, HookPoint, Operator, OperatorConfig, OperatorInput,
        OperatorOutput, Scope, SessionId, StateReader, StateStore, WorkflowId,
    };

    #[cfg(feature = "hooks")]
    pub use neuron_hooks::HookRegistry;

    #[cfg(feature = "core")]
    pub use neuron_tool::{ToolDyn, ToolError, ToolRegistry};

    #[cfg(feature = "core")]
    pub use neuron_turn::provider::{Provider, ProviderError};

    #[cfg(feature = "core")]
    pub use fluxbase_botconfig::ChatbotConfig;

    #[cfg(feature = "core")]
    pub use fluxbase_executor::{AuditRecord, ChatOutcome, ExitReason, Executor, ExecutorError};

    #[cfg(feature = "core")]
    pub use fluxbase_settings::{SettingsBackend, SettingsResolver};

    #[cfg(feature = "retrieval")]
    pub use crate::ChatbotKnowledgeRetrieval;

    #[cfg(feature = "state-memory")]
    pub use neuron_state_memory::MemoryStore;
}
