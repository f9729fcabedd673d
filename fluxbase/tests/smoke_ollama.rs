#![cfg(feature = "provider-ollama")]
//! Smoke tests against a local Ollama instance.
//!
//! `#[ignore]` by default. Run with:
//!
//!     cargo test -p fluxbase --features provider-ollama --test smoke_ollama -- --ignored
//!
//! Requires a running Ollama server with `llama3.2:1b` pulled:
//! `ollama serve` then `ollama pull llama3.2:1b`.
//!
//! Tool calling isn't exercised here — small local models are unreliable
//! at emitting well-formed tool calls (spec §4.6's fallback parser exists
//! for exactly this reason, but these tests stick to plain completion).

use fluxbase::prelude::*;
use neuron_provider_ollama::OllamaProvider;
use neuron_turn::types::{ContentPart, ProviderRequest, Role};

fn user_message(text: &str) -> neuron_turn::types::ProviderMessage {
    neuron_turn::types::ProviderMessage { role: Role::User, content: vec![ContentPart::Text { text: text.to_string() }] }
}

#[tokio::test]
#[ignore = "requires local Ollama"]
async fn smoke_basic_completion() {
    let provider = OllamaProvider::new().with_keep_alive("0");

    let request = ProviderRequest {
        model: Some("llama3.2:1b".to_string()),
        messages: vec![user_message("What is 2+2? Reply with just the number.")],
        tools: vec![],
        max_tokens: Some(64),
        temperature: Some(0.0),
        system: Some("You are a helpful assistant. Reply concisely with only the answer.".to_string()),
        extra: serde_json::Value::Null,
    };

    let response = provider.complete(request).await.expect("ollama completion should succeed");

    let text = response
        .content
        .iter()
        .find_map(|part| match part {
            ContentPart::Text { text } => Some(text.clone()),
            _ => None,
        })
        .expect("response should contain text");

    assert!(text.contains('4'), "expected '4' in response, got: {text}");
    println!("  response: {text}");
    println!("  tokens: {} in / {} out", response.usage.input_tokens, response.usage.output_tokens);
}

#[tokio::test]
#[ignore = "requires local Ollama"]
async fn smoke_full_executor_loop() {
    let provider = OllamaProvider::new().with_keep_alive("0");
    let config = ChatbotConfig {
        name: "smoke".to_string(),
        namespace: "default".to_string(),
        model: "llama3.2:1b".to_string(),
        system_prompt: "You are a helpful assistant. Answer concisely in one sentence.".to_string(),
        max_turns: Some(1),
        enabled: true,
        ..Default::default()
    };

    let executor = Executor::new(
        provider,
        ToolRegistry::new(),
        HookRegistry::new(),
        SettingsResolver::new(fluxbase_settings::InMemoryBackend::new()),
    );

    let outcome = fluxbase::handle_chat_turn(&executor, &config, "What is the capital of France?", None, None)
        .await
        .expect("ollama turn should complete");

    println!("  turns: {}", outcome.turns_used);
    assert_eq!(outcome.turns_used, 1, "should complete in 1 turn (no tools whitelisted)");

    let text = outcome
        .content
        .iter()
        .find_map(|part| match part {
            ContentPart::Text { text } => Some(text.to_lowercase()),
            _ => None,
        })
        .unwrap_or_default();
    assert!(text.contains("paris"), "expected 'paris' in: {text}");
}
