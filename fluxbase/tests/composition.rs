//! Composition integration tests — `fluxbase::handle_chat_turn` wired
//! against a scripted provider, proving the facade's re-export surface and
//! the executor loop compose the way a transport layer would use them.

use fluxbase::handle_chat_turn;
use fluxbase::prelude::*;
use neuron_turn::types::{ContentPart, ProviderRequest, ProviderResponse, Role, StopReason, TokenUsage};

struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<ProviderResponse>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses) }
    }
}

impl Provider for ScriptedProvider {
    fn complete(
        &self,
        _request: ProviderRequest,
    ) -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.is_empty() {
            Err(ProviderError::InvalidResponse("no more scripted responses".into()))
        } else {
            Ok(responses.remove(0))
        };
        async move { next }
    }
}

fn end_turn(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentPart::Text { text: text.to_string() }],
        stop_reason: StopReason::EndTurn,
        usage: TokenUsage { input_tokens: 12, output_tokens: 6, ..Default::default() },
        model: "mock-model".to_string(),
        cost: None,
        truncated: None,
    }
}

fn greeter_bot() -> ChatbotConfig {
    ChatbotConfig {
        name: "greeter".to_string(),
        namespace: "default".to_string(),
        system_prompt: "You are {{system:persona}}.".to_string(),
        enabled: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn handle_chat_turn_forwards_to_the_executor_loop() {
    let backend = fluxbase_settings::InMemoryBackend::new();
    backend.set(fluxbase_settings::Scope::System, "persona", "a concise librarian");

    let provider = ScriptedProvider::new(vec![end_turn("Hello from the stacks.")]);
    let executor = Executor::new(provider, ToolRegistry::new(), HookRegistry::new(), SettingsResolver::new(backend));

    let config = greeter_bot();
    let outcome = handle_chat_turn(&executor, &config, "hi there", Some("caller-1"), None)
        .await
        .expect("turn should complete");

    assert_eq!(outcome.exit_reason, ExitReason::Complete);
    assert_eq!(outcome.turns_used, 1);
    assert!(outcome.audit.is_empty());
}

#[tokio::test]
async fn handle_chat_turn_surfaces_disabled_bots_before_any_provider_call() {
    let mut config = greeter_bot();
    config.enabled = false;

    let provider = ScriptedProvider::new(vec![end_turn("unreachable")]);
    let executor = Executor::new(
        provider,
        ToolRegistry::new(),
        HookRegistry::new(),
        SettingsResolver::new(fluxbase_settings::InMemoryBackend::new()),
    );

    let result = handle_chat_turn(&executor, &config, "hi", None, None).await;
    assert!(matches!(result, Err(ExecutorError::Disabled(_))));
}
