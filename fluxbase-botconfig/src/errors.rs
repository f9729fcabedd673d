//! Errors from parsing a chatbot prompt module.

use thiserror::Error;

/// Failures that abort parsing outright. Malformed individual annotations
/// never land here — they are dropped and reported through
/// [`crate::parser::ParserObserver::on_warning`] instead (spec §4.1:
/// "malformed JSON for `intent-rules` yields `nil` ... never a parse
/// failure", generalized to every annotation in this parser).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BotConfigError {
    /// The module has no leading `/** ... */` doc comment to scan.
    #[error("module has no leading doc comment")]
    MissingDocComment,

    /// No ``` `...` ``` template literal followed `export default`.
    #[error("no system prompt template literal found after `export default`")]
    MissingSystemPrompt,
}
