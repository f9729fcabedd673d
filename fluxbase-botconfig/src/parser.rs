//! Annotated prompt-module parser (spec §4.1, §6 "Chatbot module file
//! format").
//!
//! Input looks like:
//!
//! ```text
//! /**
//!  * <description first line>
//!  *
//!  * @fluxbase:<key> <value>
//!  * ...
//!  */
//!
//! export default `<system prompt, may span lines>`;
//! ```
//!
//! Unknown annotations are ignored. Every recognized annotation that fails
//! to parse (bad duration, bad int, bad JSON) is dropped silently and
//! surfaced only through [`ParserObserver::on_warning`] — this parser never
//! fails on a malformed annotation, only on a structurally missing doc
//! comment or system prompt.

use crate::errors::BotConfigError;
use crate::types::{ChatbotConfig, IntentRule};
use std::time::Duration;

/// Receives non-fatal warnings emitted while parsing (spec §9 Open
/// Question: malformed `intent-rules` is silently dropped, not a parse
/// failure — callers that want visibility into *why* a field came back
/// empty implement this).
pub trait ParserObserver {
    /// Called once per dropped or malformed annotation.
    fn on_warning(&mut self, message: &str);
}

/// An observer that discards every warning.
pub struct NoopObserver;

impl ParserObserver for NoopObserver {
    fn on_warning(&mut self, _message: &str) {}
}

/// An observer that collects warnings in order, for tests and for callers
/// that want to surface them to an operator.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    /// Warnings recorded so far, in emission order.
    pub warnings: Vec<String>,
}

impl ParserObserver for CollectingObserver {
    fn on_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}

/// Parse a module's source into a [`ChatbotConfig`], discarding warnings.
pub fn parse(source: &str) -> Result<ChatbotConfig, BotConfigError> {
    let mut observer = NoopObserver;
    parse_with_observer(source, &mut observer)
}

/// Parse a module's source into a [`ChatbotConfig`], reporting non-fatal
/// issues to `observer`.
pub fn parse_with_observer(
    source: &str,
    observer: &mut dyn ParserObserver,
) -> Result<ChatbotConfig, BotConfigError> {
    let doc = extract_doc_comment(source).ok_or(BotConfigError::MissingDocComment)?;
    let lines = clean_doc_lines(doc);
    let description = first_paragraph(&lines);
    let body = lines.join("\n");
    let pairs = scan_annotations(&body, observer);

    let mut config = ChatbotConfig {
        description,
        response_language: "auto".to_string(),
        enabled: true,
        source: source.to_string(),
        ..ChatbotConfig::default()
    };

    for (key, value) in pairs {
        apply_annotation(&mut config, &key, &value, observer);
    }

    config.system_prompt = extract_system_prompt(source).ok_or(BotConfigError::MissingSystemPrompt)?;

    Ok(config)
}

/// Splits `schema.table` at the first dot; an unqualified name receives
/// `default_schema` (spec §4.1 "Qualified table names").
pub fn parse_qualified_table(name: &str, default_schema: &str) -> (String, String) {
    let default_schema = if default_schema.is_empty() { "public" } else { default_schema };
    match name.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (default_schema.to_string(), name.to_string()),
    }
}

fn extract_doc_comment(source: &str) -> Option<&str> {
    let start = source.find("/**")? + 3;
    let end = source[start..].find("*/")?;
    Some(&source[start..start + end])
}

fn clean_doc_lines(doc: &str) -> Vec<String> {
    doc.lines()
        .map(|line| {
            let trimmed = line.trim();
            let trimmed = trimmed.strip_prefix('*').unwrap_or(trimmed);
            trimmed.strip_prefix(' ').unwrap_or(trimmed).to_string()
        })
        .collect()
}

fn first_paragraph(lines: &[String]) -> Option<String> {
    let mut collected = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("@fluxbase:") {
            break;
        }
        if line.trim().is_empty() {
            if !collected.is_empty() {
                break;
            }
            continue;
        }
        collected.push(line.trim().to_string());
    }
    if collected.is_empty() {
        None
    } else {
        Some(collected.join(" "))
    }
}

fn extract_system_prompt(source: &str) -> Option<String> {
    let anchor = source.find("export default")? + "export default".len();
    let rest = &source[anchor..];
    let open_rel = rest.find('`')?;
    let after_open = &rest[open_rel + 1..];
    let mut end = None;
    let bytes = after_open.as_bytes();
    let mut i = 0;
    let mut escaped = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '`' {
            end = Some(i);
            break;
        }
        i += 1;
    }
    let end = end?;
    Some(after_open[..end].to_string())
}

fn scan_annotations(body: &str, observer: &mut dyn ParserObserver) -> Vec<(String, String)> {
    const MARKER: &str = "@fluxbase:";
    let mut pairs = Vec::new();
    let mut pos = 0usize;

    while let Some(rel) = body[pos..].find(MARKER) {
        let key_start = pos + rel + MARKER.len();
        let rest = &body[key_start..];
        let key_len = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let key = rest[..key_len].to_string();

        let mut cursor = key_start + key_len;
        while cursor < body.len() && matches!(body.as_bytes()[cursor], b' ' | b'\t') {
            cursor += 1;
        }

        if key == "intent-rules" {
            match extract_balanced_json(&body[cursor..]) {
                Some((value, consumed)) => {
                    pairs.push((key, value));
                    cursor += consumed;
                }
                None => {
                    observer.on_warning("intent-rules: no balanced JSON array found, dropping annotation");
                    let line_end = body[cursor..]
                        .find('\n')
                        .map(|i| cursor + i)
                        .unwrap_or(body.len());
                    cursor = line_end;
                }
            }
        } else {
            let line_end = body[cursor..]
                .find('\n')
                .map(|i| cursor + i)
                .unwrap_or(body.len());
            let value = body[cursor..line_end].trim().to_string();
            pairs.push((key, value));
            cursor = line_end;
        }

        pos = cursor;
    }

    pairs
}

/// Extracts a brace-balanced (bracket-balanced) JSON array starting at the
/// first `[` in `s` (skipping leading whitespace), respecting quoted
/// strings and escapes. Returns the extracted text and the byte offset in
/// `s` just past the closing `]`.
fn extract_balanced_json(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'[' {
        return None;
    }
    let start = i;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((s[start..=i].to_string(), i + 1));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|tok| tok.trim().to_string())
        .filter(|tok| !tok.is_empty())
        .collect()
}

/// Repeated-key array merge (spec §4.1: "same key repeated merges (arrays
/// concat, maps union)"; spec §6: "append for arrays"). Plain concatenation
/// — duplicates across occurrences are preserved, not deduped.
fn extend_concat(target: &mut Vec<String>, values: Vec<String>) {
    target.extend(values);
}

fn parse_bool(value: &str, key: &str, observer: &mut dyn ParserObserver) -> Option<bool> {
    match value.trim() {
        "true" => Some(true),
        "false" => Some(false),
        other => {
            observer.on_warning(&format!("{key}: expected `true`/`false`, got `{other}`, dropping annotation"));
            None
        }
    }
}

fn parse_duration(value: &str, observer: &mut dyn ParserObserver) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        observer.on_warning(&format!("conversation-ttl: `{value}` is not a valid duration, dropping annotation"));
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "h" => amount.checked_mul(3600)?,
        "m" => amount.checked_mul(60)?,
        "s" => amount,
        _ => {
            observer.on_warning(&format!("conversation-ttl: unknown unit in `{value}`, dropping annotation"));
            return None;
        }
    };
    Some(Duration::from_secs(seconds))
}

fn apply_annotation(config: &mut ChatbotConfig, key: &str, value: &str, observer: &mut dyn ParserObserver) {
    match key {
        "allowed-tables" => extend_concat(&mut config.allowed_tables, split_csv(value)),
        "allowed-operations" => extend_concat(&mut config.allowed_operations, split_csv(value)),
        "allowed-schemas" => extend_concat(&mut config.allowed_schemas, split_csv(value)),
        "http-allowed-domains" => extend_concat(&mut config.http_allowed_domains, split_csv(value)),
        "max-tokens" => match value.parse() {
            Ok(n) => config.max_tokens = Some(n),
            Err(_) => observer.on_warning(&format!("max-tokens: `{value}` is not an integer, dropping annotation")),
        },
        "temperature" => match value.parse() {
            Ok(n) => config.temperature = Some(n),
            Err(_) => observer.on_warning(&format!("temperature: `{value}` is not a number, dropping annotation")),
        },
        "model" => config.model = Some(value.to_string()),
        "persist-conversations" => {
            if let Some(b) = parse_bool(value, key, observer) {
                config.persist_conversations = Some(b);
            }
        }
        "conversation-ttl" => {
            if let Some(d) = parse_duration(value, observer) {
                config.conversation_ttl = Some(d);
            }
        }
        "max-turns" => match value.parse() {
            Ok(n) => config.max_turns = Some(n),
            Err(_) => observer.on_warning(&format!("max-turns: `{value}` is not an integer, dropping annotation")),
        },
        "rate-limit" => match value.strip_suffix("/min").and_then(|n| n.parse().ok()) {
            Some(n) => config.rate_limit_per_minute = Some(n),
            None => observer.on_warning(&format!("rate-limit: `{value}` is not `N/min`, dropping annotation")),
        },
        "daily-limit" => match value.parse() {
            Ok(n) => config.daily_request_limit = Some(n),
            Err(_) => observer.on_warning(&format!("daily-limit: `{value}` is not an integer, dropping annotation")),
        },
        "token-budget" => match value.strip_suffix("/day").and_then(|n| n.parse().ok()) {
            Some(n) => config.daily_token_budget = Some(n),
            None => observer.on_warning(&format!("token-budget: `{value}` is not `N/day`, dropping annotation")),
        },
        "allow-unauthenticated" => {
            if let Some(b) = parse_bool(value, key, observer) {
                config.allow_unauthenticated = Some(b);
            }
        }
        "public" => {
            if let Some(b) = parse_bool(value, key, observer) {
                config.is_public = Some(b);
            }
        }
        "version" => match value.parse() {
            Ok(n) => config.version = Some(n),
            Err(_) => observer.on_warning(&format!("version: `{value}` is not an integer, dropping annotation")),
        },
        "default-table" => config.default_table = Some(value.to_string()),
        "required-columns" => apply_required_columns(config, value, observer),
        "intent-rules" => match serde_json::from_str::<Vec<IntentRule>>(value) {
            Ok(rules) => {
                config.intent_rules.get_or_insert_with(Vec::new).extend(rules);
            }
            Err(e) => observer.on_warning(&format!("intent-rules: malformed JSON ({e}), dropping annotation")),
        },
        "knowledge-base" | "knowledge-bases" => extend_concat(&mut config.knowledge_bases, split_csv(value)),
        "rag-max-chunks" => match value.parse() {
            Ok(n) => config.rag_params.max_chunks = Some(n),
            Err(_) => observer.on_warning(&format!("rag-max-chunks: `{value}` is not an integer, dropping annotation")),
        },
        "rag-similarity-threshold" => match value.parse() {
            Ok(n) => config.rag_params.similarity_threshold = Some(n),
            Err(_) => observer.on_warning(&format!(
                "rag-similarity-threshold: `{value}` is not a number, dropping annotation"
            )),
        },
        "rag-table" => config.rag_params.table = Some(value.to_string()),
        "rag-column" => config.rag_params.column = Some(value.to_string()),
        "rag-content-column" => config.rag_params.content_column = Some(value.to_string()),
        "response-language" => {
            if !value.is_empty() {
                config.response_language = value.to_string();
            }
        }
        "disable-execution-logs" => {
            if let Some(b) = parse_bool(value, key, observer) {
                config.disable_execution_logs = Some(b);
            }
        }
        "required-settings" => extend_concat(&mut config.required_settings, split_csv(value)),
        "mcp-tools" => extend_concat(&mut config.mcp_tools, split_csv(value)),
        "use-mcp-schema" => {
            // Bare flag (no value before end-of-line) is truthy; every other
            // boolean annotation requires an explicit `true`/`false` token
            // (spec §9 Open Question).
            if value.is_empty() {
                config.use_mcp_schema = true;
            } else if let Some(b) = parse_bool(value, key, observer) {
                config.use_mcp_schema = b;
            }
        }
        _ => { /* unknown annotations are ignored, per spec §4.1 */ }
    }
}

fn apply_required_columns(config: &mut ChatbotConfig, value: &str, observer: &mut dyn ParserObserver) {
    for group in value.split_whitespace() {
        match group.split_once('=') {
            Some((table, cols)) if !table.is_empty() => {
                let entry = config.required_columns.entry(table.to_string()).or_default();
                extend_concat(entry, split_csv(cols));
            }
            _ => observer.on_warning(&format!(
                "required-columns: group `{group}` is not `table=c,c`, dropping"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"/**
 * A support bot for the billing namespace.
 *
 * @fluxbase:allowed-tables invoices, payments
 * @fluxbase:allowed-tables refunds
 * @fluxbase:allowed-operations select
 * @fluxbase:max-tokens 2048
 * @fluxbase:temperature 0.9
 * @fluxbase:persist-conversations true
 * @fluxbase:conversation-ttl 24h
 * @fluxbase:rate-limit 60/min
 * @fluxbase:token-budget 100000/day
 * @fluxbase:public false
 * @fluxbase:required-columns invoices=id,total payments=id,amount
 * @fluxbase:intent-rules [{"keywords": ["refund"], "requiredTable": "refunds"}]
 * @fluxbase:mcp-tools query_table, execute_sql
 * @fluxbase:use-mcp-schema
 */

export default `You are a billing support assistant.
Be concise.`;
"#;

    #[test]
    fn parses_description_from_first_paragraph() {
        let config = parse(MODULE).unwrap();
        assert_eq!(
            config.description.as_deref(),
            Some("A support bot for the billing namespace.")
        );
    }

    #[test]
    fn repeated_csv_keys_concat() {
        let config = parse(MODULE).unwrap();
        assert_eq!(config.allowed_tables, vec!["invoices", "payments", "refunds"]);
    }

    #[test]
    fn repeated_csv_keys_preserve_duplicates() {
        let source = r#"/**
 * Bot.
 *
 * @fluxbase:allowed-tables invoices
 * @fluxbase:allowed-tables invoices
 */

export default `hi`;
"#;
        let config = parse(source).unwrap();
        assert_eq!(config.allowed_tables, vec!["invoices", "invoices"]);
    }

    #[test]
    fn scalars_and_bools_parse() {
        let config = parse(MODULE).unwrap();
        assert_eq!(config.max_tokens, Some(2048));
        assert_eq!(config.temperature, Some(0.9));
        assert_eq!(config.persist_conversations, Some(true));
        assert_eq!(config.is_public, Some(false));
    }

    #[test]
    fn duration_rate_limit_and_token_budget_parse() {
        let config = parse(MODULE).unwrap();
        assert_eq!(config.conversation_ttl, Some(Duration::from_secs(24 * 3600)));
        assert_eq!(config.rate_limit_per_minute, Some(60));
        assert_eq!(config.daily_token_budget, Some(100_000));
    }

    #[test]
    fn required_columns_builds_map() {
        let config = parse(MODULE).unwrap();
        assert_eq!(config.required_columns.get("invoices").unwrap(), &vec!["id", "total"]);
        assert_eq!(config.required_columns.get("payments").unwrap(), &vec!["id", "amount"]);
    }

    #[test]
    fn intent_rules_parses_balanced_json() {
        let config = parse(MODULE).unwrap();
        let rules = config.intent_rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].keywords, vec!["refund"]);
        assert_eq!(rules[0].required_table.as_deref(), Some("refunds"));
    }

    #[test]
    fn bare_use_mcp_schema_is_truthy() {
        let config = parse(MODULE).unwrap();
        assert!(config.use_mcp_schema);
    }

    #[test]
    fn system_prompt_extracted_from_template_literal() {
        let config = parse(MODULE).unwrap();
        assert_eq!(config.system_prompt, "You are a billing support assistant.\nBe concise.");
    }

    #[test]
    fn malformed_intent_rules_is_nil_not_a_failure() {
        let source = r#"/**
 * Broken bot.
 *
 * @fluxbase:intent-rules [{"keywords": ["x"]
 */

export default `hi`;
"#;
        let mut observer = CollectingObserver::default();
        let config = parse_with_observer(source, &mut observer).unwrap();
        assert!(config.intent_rules.is_none());
        assert!(!observer.warnings.is_empty());
    }

    #[test]
    fn malformed_boolean_is_dropped_not_fatal() {
        let source = r#"/**
 * Bot.
 *
 * @fluxbase:public maybe
 */

export default `hi`;
"#;
        let mut observer = CollectingObserver::default();
        let config = parse_with_observer(source, &mut observer).unwrap();
        assert!(config.is_public.is_none());
        assert!(!observer.warnings.is_empty());
    }

    #[test]
    fn missing_doc_comment_is_an_error() {
        let source = "export default `hi`;";
        assert!(matches!(parse(source), Err(BotConfigError::MissingDocComment)));
    }

    #[test]
    fn missing_system_prompt_is_an_error() {
        let source = "/** * no export here */";
        assert!(matches!(parse(source), Err(BotConfigError::MissingSystemPrompt)));
    }

    #[test]
    fn unknown_annotations_are_ignored() {
        let source = r#"/**
 * Bot.
 *
 * @fluxbase:totally-unknown something
 */

export default `hi`;
"#;
        assert!(parse(source).is_ok());
    }

    #[test]
    fn qualified_table_splits_at_first_dot() {
        assert_eq!(
            parse_qualified_table("billing.invoices", ""),
            ("billing".to_string(), "invoices".to_string())
        );
        assert_eq!(
            parse_qualified_table("invoices", ""),
            ("public".to_string(), "invoices".to_string())
        );
        assert_eq!(
            parse_qualified_table("invoices", "tenant_a"),
            ("tenant_a".to_string(), "invoices".to_string())
        );
    }
}
