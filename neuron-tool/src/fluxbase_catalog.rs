//! Fixed tool catalog, scope derivation, whitelist filtering, and the dual
//! schema shapes an LLM provider expects (spec §4.6).
//!
//! This module never talks to [`crate::ToolRegistry`] directly — it is
//! metadata the executor consults to build provider-facing schemas and to
//! validate a requested tool call before dispatching it through the
//! registry.

use serde_json::Value;

/// A capability string a tool call requires, e.g. `"read:tables"`.
pub type Scope = &'static str;

/// Coarse grouping for catalog browsing. Not consulted for enforcement —
/// enforcement is whitelist + scope based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Row-level reads/writes against configured tables.
    Data,
    /// SQL, functions, RPCs, and background jobs.
    Execution,
    /// Object storage listing and blob transfer.
    Storage,
    /// Embedding similarity search.
    Vectors,
    /// Outbound HTTP.
    Http,
    /// Scratch-space reasoning with no side effect.
    Reasoning,
}

/// One entry in the fixed catalog.
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    /// The tool's unique name, as it appears in a whitelist or a call.
    pub name: &'static str,
    /// Human-readable description surfaced to the provider.
    pub description: &'static str,
    /// Catalog grouping.
    pub category: ToolCategory,
    /// Scopes a bot must be granted to invoke this tool.
    pub required_scopes: &'static [Scope],
    /// Whether the tool can mutate any state.
    pub read_only: bool,
}

/// The canonical tool set (spec §4.6 table). Order is significant only for
/// iteration determinism, not for precedence.
pub const CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "think",
        description: "Scratch space for reasoning; has no side effect and returns no data.",
        category: ToolCategory::Reasoning,
        required_scopes: &[],
        read_only: true,
    },
    ToolDescriptor {
        name: "query_table",
        description: "Read rows from an allowed table with optional filters.",
        category: ToolCategory::Data,
        required_scopes: &["read:tables"],
        read_only: true,
    },
    ToolDescriptor {
        name: "insert_record",
        description: "Insert a row into an allowed table.",
        category: ToolCategory::Data,
        required_scopes: &["write:tables"],
        read_only: false,
    },
    ToolDescriptor {
        name: "update_record",
        description: "Update a row in an allowed table.",
        category: ToolCategory::Data,
        required_scopes: &["write:tables"],
        read_only: false,
    },
    ToolDescriptor {
        name: "delete_record",
        description: "Delete a row from an allowed table.",
        category: ToolCategory::Data,
        required_scopes: &["write:tables"],
        read_only: false,
    },
    ToolDescriptor {
        name: "execute_sql",
        description: "Run a validated read-only SQL statement against allowed tables.",
        category: ToolCategory::Execution,
        required_scopes: &["execute:sql"],
        read_only: true,
    },
    ToolDescriptor {
        name: "invoke_function",
        description: "Invoke a configured server-side function.",
        category: ToolCategory::Execution,
        required_scopes: &["execute:functions"],
        read_only: false,
    },
    ToolDescriptor {
        name: "invoke_rpc",
        description: "Invoke a configured RPC endpoint.",
        category: ToolCategory::Execution,
        required_scopes: &["execute:rpc"],
        read_only: false,
    },
    ToolDescriptor {
        name: "submit_job",
        description: "Submit a background job for asynchronous execution.",
        category: ToolCategory::Execution,
        required_scopes: &["execute:jobs"],
        read_only: false,
    },
    ToolDescriptor {
        name: "get_job_status",
        description: "Poll the status of a previously submitted job.",
        category: ToolCategory::Execution,
        required_scopes: &["execute:jobs"],
        read_only: true,
    },
    ToolDescriptor {
        name: "list_objects",
        description: "List objects in an allowed storage bucket/prefix.",
        category: ToolCategory::Storage,
        required_scopes: &["read:storage"],
        read_only: true,
    },
    ToolDescriptor {
        name: "download_object",
        description: "Download the content of a storage object.",
        category: ToolCategory::Storage,
        required_scopes: &["read:storage"],
        read_only: true,
    },
    ToolDescriptor {
        name: "upload_object",
        description: "Upload content to a storage object.",
        category: ToolCategory::Storage,
        required_scopes: &["write:storage"],
        read_only: false,
    },
    ToolDescriptor {
        name: "delete_object",
        description: "Delete a storage object.",
        category: ToolCategory::Storage,
        required_scopes: &["write:storage"],
        read_only: false,
    },
    ToolDescriptor {
        name: "search_vectors",
        description: "Similarity search over a knowledge base's embedded chunks.",
        category: ToolCategory::Vectors,
        required_scopes: &["read:vectors"],
        read_only: true,
    },
    ToolDescriptor {
        name: "vector_search",
        description: "Alias of search_vectors.",
        category: ToolCategory::Vectors,
        required_scopes: &["read:vectors"],
        read_only: true,
    },
    ToolDescriptor {
        name: "http_request",
        description: "Make an outbound HTTP request to an allowed domain.",
        category: ToolCategory::Http,
        required_scopes: &["execute:http"],
        read_only: true,
    },
];

/// Look up a catalog entry by name.
pub fn find(name: &str) -> Option<&'static ToolDescriptor> {
    CATALOG.iter().find(|d| d.name == name)
}

/// The union of scopes required by the named tools, in first-seen order.
/// Unknown names contribute nothing.
pub fn derive_scopes(tool_names: &[String]) -> Vec<Scope> {
    let mut scopes = Vec::new();
    for name in tool_names {
        if let Some(desc) = find(name) {
            for scope in desc.required_scopes {
                if !scopes.contains(scope) {
                    scopes.push(*scope);
                }
            }
        }
    }
    scopes
}

/// Keep only `candidates` present in `whitelist`, preserving `candidates`'
/// order. An empty whitelist always yields an empty result — fail closed,
/// never fail open to "allow everything".
pub fn filter_allowed_tools(candidates: &[String], whitelist: &[String]) -> Vec<String> {
    if whitelist.is_empty() {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|name| whitelist.iter().any(|w| w == *name))
        .cloned()
        .collect()
}

/// The `{type: "function", function: {name, description, parameters}}` shape.
pub fn schema_function_wrapped(desc: &ToolDescriptor, parameters: Value) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": desc.name,
            "description": desc.description,
            "parameters": parameters,
        },
    })
}

/// The `{name, description, input_schema}` flat shape.
pub fn schema_flat(desc: &ToolDescriptor, input_schema: Value) -> Value {
    serde_json::json!({
        "name": desc.name,
        "description": desc.description,
        "input_schema": input_schema,
    })
}

/// A tool call recovered from plain-text assistant content.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackToolCall {
    /// The tool name, already verified against the whitelist.
    pub name: String,
    /// The call's arguments object.
    pub arguments: Value,
}

/// Small models sometimes emit tool intent as a bare JSON object in the
/// assistant message rather than a structured tool-call field. If the
/// trimmed content parses as an object with a `name` naming a whitelisted
/// tool and an `arguments` object, promote it to a synthetic call;
/// otherwise the content is ordinary text and this returns `None`.
pub fn try_parse_fallback_tool_call(content: &str, whitelist: &[String]) -> Option<FallbackToolCall> {
    let value: Value = serde_json::from_str(content.trim()).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?;
    if !whitelist.iter().any(|w| w == name) {
        return None;
    }
    let arguments = obj.get("arguments")?;
    if !arguments.is_object() {
        return None;
    }
    Some(FallbackToolCall {
        name: name.to_string(),
        arguments: arguments.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_scopes_unions_and_dedupes() {
        let tools = vec!["query_table".to_string(), "insert_record".to_string(), "query_table".to_string()];
        let scopes = derive_scopes(&tools);
        assert_eq!(scopes, vec!["read:tables", "write:tables"]);
    }

    #[test]
    fn derive_scopes_ignores_unknown_names() {
        let tools = vec!["not_a_real_tool".to_string()];
        assert!(derive_scopes(&tools).is_empty());
    }

    #[test]
    fn filter_allowed_tools_is_fail_closed_on_empty_whitelist() {
        let candidates = vec!["query_table".to_string()];
        assert!(filter_allowed_tools(&candidates, &[]).is_empty());
    }

    #[test]
    fn filter_allowed_tools_preserves_candidate_order() {
        let candidates = vec![
            "delete_record".to_string(),
            "query_table".to_string(),
            "http_request".to_string(),
        ];
        let whitelist = vec!["http_request".to_string(), "query_table".to_string()];
        assert_eq!(
            filter_allowed_tools(&candidates, &whitelist),
            vec!["query_table".to_string(), "http_request".to_string()]
        );
    }

    #[test]
    fn think_requires_no_scopes() {
        assert!(find("think").unwrap().required_scopes.is_empty());
    }

    #[test]
    fn schema_shapes_both_carry_name_and_description() {
        let desc = find("query_table").unwrap();
        let params = serde_json::json!({"type": "object"});
        let wrapped = schema_function_wrapped(desc, params.clone());
        assert_eq!(wrapped["function"]["name"], "query_table");
        let flat = schema_flat(desc, params);
        assert_eq!(flat["name"], "query_table");
        assert!(flat.get("function").is_none());
    }

    #[test]
    fn fallback_parser_promotes_whitelisted_json_object() {
        let content = r#"{"name": "query_table", "arguments": {"table": "users"}}"#;
        let whitelist = vec!["query_table".to_string()];
        let call = try_parse_fallback_tool_call(content, &whitelist).unwrap();
        assert_eq!(call.name, "query_table");
        assert_eq!(call.arguments, serde_json::json!({"table": "users"}));
    }

    #[test]
    fn fallback_parser_rejects_non_whitelisted_name() {
        let content = r#"{"name": "delete_record", "arguments": {}}"#;
        let whitelist = vec!["query_table".to_string()];
        assert!(try_parse_fallback_tool_call(content, &whitelist).is_none());
    }

    #[test]
    fn fallback_parser_ignores_ordinary_text() {
        let whitelist = vec!["query_table".to_string()];
        assert!(try_parse_fallback_tool_call("Here is your answer.", &whitelist).is_none());
    }

    #[test]
    fn fallback_parser_requires_arguments_object() {
        let content = r#"{"name": "query_table", "arguments": "oops"}"#;
        let whitelist = vec!["query_table".to_string()];
        assert!(try_parse_fallback_tool_call(content, &whitelist).is_none());
    }
}
