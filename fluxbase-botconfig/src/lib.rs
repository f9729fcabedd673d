#![deny(missing_docs)]
//! Annotated chatbot prompt-module parser and config-diff applier.
//!
//! [`parser`] turns a module's source text into a typed [`ChatbotConfig`];
//! [`applier`] computes a field-level diff between two config versions for
//! the sync path a bot's deploy lifecycle implies.

pub mod applier;
pub mod errors;
pub mod parser;
pub mod types;

pub use applier::{ConfigApplier, ConfigDiff};
pub use errors::BotConfigError;
pub use parser::{parse, parse_qualified_table, parse_with_observer, CollectingObserver, NoopObserver, ParserObserver};
pub use types::{ChatbotConfig, IntentRule, RagParams};
