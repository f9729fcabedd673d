//! `ChatbotConfig` and its nested types — Data Model "Chatbot" (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// A predicate `{keywords[], requiredTable?, forbiddenTable?}` used to
/// steer retrieval/SQL generation (spec §4.1 `intent-rules`, GLOSSARY).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    /// Keywords that trigger this rule.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Table that must be used when this rule matches.
    #[serde(default, rename = "requiredTable", skip_serializing_if = "Option::is_none")]
    pub required_table: Option<String>,
    /// Table that must not be used when this rule matches.
    #[serde(default, rename = "forbiddenTable", skip_serializing_if = "Option::is_none")]
    pub forbidden_table: Option<String>,
}

/// Per-bot RAG tuning, populated from the `rag-*` annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagParams {
    /// Maximum chunks to retrieve per search (`rag-max-chunks`).
    pub max_chunks: Option<u32>,
    /// Minimum similarity to keep a result (`rag-similarity-threshold`).
    pub similarity_threshold: Option<f64>,
    /// Override table to search (`rag-table`).
    pub table: Option<String>,
    /// Override embedding column (`rag-column`).
    pub column: Option<String>,
    /// Override content column (`rag-content-column`).
    pub content_column: Option<String>,
}

/// `Chatbot` — spec §3 Data Model, as produced by the annotation parser.
///
/// Invariants: `(name, namespace)` is unique at the storage layer (not
/// enforced here — this type is pre-persistence); `temperature` is
/// deliberately left unclamped per spec §9's Open Question;
/// `rate_limit_per_minute >= 0` holds trivially since it's unsigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatbotConfig {
    /// Storage identity; absent for a freshly parsed, not-yet-persisted config.
    pub id: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// First non-empty paragraph of the leading doc comment.
    pub description: Option<String>,
    /// Caller-supplied identifier distinct from `name` (e.g. a slug).
    pub code: Option<String>,
    /// The system prompt, extracted from the first template literal
    /// following `export default`.
    pub system_prompt: String,
    /// Model identifier.
    pub model: Option<String>,
    /// Reference to a configured provider, when not using the default.
    pub provider_ref: Option<String>,
    /// Tables the bot's tools may touch.
    pub allowed_tables: Vec<String>,
    /// Operations (`select`, `insert`, ...) the bot's tools may perform.
    pub allowed_operations: Vec<String>,
    /// Schemas the bot's tools may touch.
    pub allowed_schemas: Vec<String>,
    /// Domains `http_request` may reach.
    pub http_allowed_domains: Vec<String>,
    /// Per-response token ceiling.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. Never clamped — see module docs.
    pub temperature: Option<f64>,
    /// Whether conversation turns are persisted.
    pub persist_conversations: Option<bool>,
    /// How long a persisted conversation is retained.
    pub conversation_ttl: Option<Duration>,
    /// Maximum Executor loop rounds for one turn.
    pub max_turns: Option<u32>,
    /// Per-caller rate limit.
    pub rate_limit_per_minute: Option<u32>,
    /// Per-caller daily request ceiling.
    pub daily_request_limit: Option<u32>,
    /// Per-caller daily token budget.
    pub daily_token_budget: Option<u64>,
    /// Whether unauthenticated callers may use this bot.
    pub allow_unauthenticated: Option<bool>,
    /// Whether this bot is publicly listed.
    pub is_public: Option<bool>,
    /// Intent rules extracted from `intent-rules`. `None` both when the
    /// annotation is absent and when it was present but malformed JSON
    /// (spec §9 Open Question — silently nil, never a parse failure).
    pub intent_rules: Option<Vec<IntentRule>>,
    /// Per-table column whitelist (`required-columns`).
    pub required_columns: HashMap<String, Vec<String>>,
    /// Default table for unqualified queries.
    pub default_table: Option<String>,
    /// Names of knowledge bases linked to this bot.
    pub knowledge_bases: Vec<String>,
    /// RAG tuning parameters.
    pub rag_params: RagParams,
    /// Response language, defaulting to `"auto"`.
    pub response_language: String,
    /// Whether per-turn execution logs are suppressed. Never suppresses
    /// `tracing` spans themselves, only the audit-record sink — an
    /// enforcement detail owned by `fluxbase-executor`.
    pub disable_execution_logs: Option<bool>,
    /// Settings keys that must resolve before the bot may run.
    pub required_settings: Vec<String>,
    /// Names of MCP tools this bot may call.
    pub mcp_tools: Vec<String>,
    /// Whether MCP tool schemas use the `input_schema` flat shape instead
    /// of the function-wrapped shape. Bare `@fluxbase:use-mcp-schema` is
    /// truthy; every other boolean annotation requires an explicit
    /// `true`/`false` token (spec §9 Open Question).
    pub use_mcp_schema: bool,
    /// Monotonic config version.
    pub version: Option<u32>,
    /// Whether the bot currently accepts chat turns.
    pub enabled: bool,
    /// The raw module source this config was parsed from.
    pub source: String,
}

impl ChatbotConfig {
    /// The union of scopes every linked MCP tool requires (spec §3
    /// "Chatbot" invariant: "if `mcpTools` non-empty, derived scopes =
    /// union of per-tool scope sets").
    pub fn derived_scopes(&self) -> Vec<neuron_tool::fluxbase_catalog::Scope> {
        neuron_tool::fluxbase_catalog::derive_scopes(&self.mcp_tools)
    }
}
