//! A chat turn that calls a custom tool, driven by a scripted provider so
//! the example runs without any API key or network access.
//!
//! ```sh
//! cargo run --example tool_calling_turn -p fluxbase
//! ```

use fluxbase::prelude::*;
use neuron_turn::types::{ContentPart, ProviderRequest, ProviderResponse, StopReason, TokenUsage};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// Implements the catalog's `think` tool: a no-op scratchpad the model can
/// call to reason out loud without touching any data.
struct ThinkTool;

impl ToolDyn for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Scratch space for reasoning; has no side effect and returns no data."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"thought": {"type": "string"}}, "required": ["thought"]})
    }

    fn call(
        &self,
        _input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>> {
        Box::pin(async move { Ok(json!({})) })
    }
}

/// Plays back a fixed script: first a `think` call, then a final answer
/// once the tool result comes back in the next request's messages.
struct ScriptedProvider {
    turn: Mutex<u32>,
}

impl Provider for ScriptedProvider {
    fn complete(
        &self,
        _request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let mut turn = self.turn.lock().unwrap();
        *turn += 1;
        let response = if *turn == 1 {
            ProviderResponse {
                content: vec![ContentPart::ToolUse {
                    id: "call_1".to_string(),
                    name: "think".to_string(),
                    input: json!({"thought": "the user asked to rate two options, I should weigh them first"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage { input_tokens: 18, output_tokens: 9, ..Default::default() },
                model: "scripted".to_string(),
                cost: None,
                truncated: None,
            }
        } else {
            ProviderResponse {
                content: vec![ContentPart::Text {
                    text: "Go with the second option — it has lower latency under load.".to_string(),
                }],
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage { input_tokens: 24, output_tokens: 7, ..Default::default() },
                model: "scripted".to_string(),
                cost: None,
                truncated: None,
            }
        };
        async move { Ok(response) }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let provider = ScriptedProvider { turn: Mutex::new(0) };

    let mut tools = ToolRegistry::new();
    tools.register(std::sync::Arc::new(ThinkTool));

    let config = ChatbotConfig {
        name: "advisor-bot".to_string(),
        namespace: "default".to_string(),
        system_prompt: "You weigh tradeoffs before recommending an option.".to_string(),
        enabled: true,
        mcp_tools: vec!["think".to_string()],
        ..Default::default()
    };

    let executor = Executor::new(
        provider,
        tools,
        HookRegistry::new(),
        SettingsResolver::new(fluxbase_settings::InMemoryBackend::new()),
    );

    let outcome =
        fluxbase::handle_chat_turn(&executor, &config, "Option A or option B, which should we ship?", None, None)
            .await?;

    let text = outcome
        .content
        .iter()
        .find_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .unwrap_or("[no text in response]");

    println!("Response: {text}");
    println!("Turns:    {}", outcome.turns_used);
    println!("Tool calls logged: {}", outcome.audit.len());
    for record in &outcome.audit {
        println!("  - {} -> {:?}", record.tool_name, record.verdict);
    }

    Ok(())
}
