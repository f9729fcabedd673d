//! Run a single chat turn against a live Ollama model.
//!
//! Requires a running Ollama server with `llama3.2:1b` pulled:
//! `ollama serve` then `ollama pull llama3.2:1b`.
//!
//! ```sh
//! cargo run --example basic_chat_turn -p fluxbase --features provider-ollama
//! ```

use fluxbase::prelude::*;
use neuron_provider_ollama::OllamaProvider;
use neuron_turn::types::ContentPart;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let provider = OllamaProvider::new().with_keep_alive("0");

    let config = ChatbotConfig {
        name: "assistant".to_string(),
        namespace: "default".to_string(),
        model: Some("llama3.2:1b".to_string()),
        system_prompt: "You are a concise assistant. Answer in one short sentence.".to_string(),
        enabled: true,
        ..Default::default()
    };

    let backend = fluxbase_settings::InMemoryBackend::new();
    let executor = Executor::new(
        provider,
        ToolRegistry::new(),
        HookRegistry::new(),
        SettingsResolver::new(backend),
    );

    let outcome =
        fluxbase::handle_chat_turn(&executor, &config, "What is the capital of France?", None, None).await?;

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
    println!("Exit:     {:?}", outcome.exit_reason);

    Ok(())
}
