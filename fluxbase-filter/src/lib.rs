#![deny(missing_docs)]
//! Metadata filter AST and its compiler to parameterized SQL (spec §4.5).
//!
//! A [`Group`] is a small expression tree over JSONB `metadata` columns:
//! flat [`Condition`]s ANDed/ORed together, with nested [`Group`]s for
//! parenthesized sub-expressions. [`compile`] turns one into a
//! `(where_fragment, bind_args)` pair starting from a caller-supplied
//! parameter index, so the same filter can be spliced into a larger query
//! alongside other already-numbered `$n` placeholders.
//!
//! Every condition is rendered against the *text* extraction of the key
//! (`metadata->>'key'`), matching how the source system always compares
//! metadata values as text rather than casting per operator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while compiling a [`Group`] to SQL.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    /// An `eq`/`ne`/`ilike`/`like`/`gt`/`gte`/`lt`/`lte` condition had no `value`.
    #[error("condition on {key:?} requires a value")]
    MissingValue {
        /// The condition's metadata key.
        key: String,
    },

    /// An `in`/`nin` condition had no `values`, or an empty list.
    #[error("condition on {key:?} requires a non-empty values list")]
    MissingValues {
        /// The condition's metadata key.
        key: String,
    },

    /// A `between` condition was missing `min` and/or `max`.
    #[error("condition on {key:?} requires both min and max")]
    MissingRange {
        /// The condition's metadata key.
        key: String,
    },

    /// The operator string didn't match any recognized operator.
    #[error("unknown filter operator: {0:?}")]
    UnknownOperator(String),

    /// A bound value couldn't be rendered as SQL text (e.g. an array or object).
    #[error("value for {key:?} is not a scalar: {reason}")]
    InvalidValueType {
        /// The condition's metadata key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Supported comparison operators (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `ILIKE`
    Ilike,
    /// `LIKE`
    Like,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    Nin,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `BETWEEN min AND max`
    Between,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
}

impl FilterOperator {
    /// Parse the spec's wire names (`eq`, `ne`, `ilike`, ... `isNull`, `isNotNull`).
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        Ok(match raw {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "ilike" => Self::Ilike,
            "like" => Self::Like,
            "in" => Self::In,
            "nin" => Self::Nin,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "between" => Self::Between,
            "isNull" => Self::IsNull,
            "isNotNull" => Self::IsNotNull,
            other => return Err(FilterError::UnknownOperator(other.to_string())),
        })
    }

    fn sql_symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Ilike => "ILIKE",
            Self::Like => "LIKE",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            // These are rendered by dedicated branches, not via `sql_symbol`.
            Self::In | Self::Nin | Self::Between | Self::IsNull | Self::IsNotNull => "",
        }
    }
}

/// A single leaf condition: `metadata->>'key' OP value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// The JSONB metadata key to compare.
    pub key: String,
    /// The comparison operator.
    pub operator: FilterOperator,
    /// Scalar operand for `eq`/`ne`/`ilike`/`like`/`gt`/`gte`/`lt`/`lte`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// List operand for `in`/`nin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
    /// Lower bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<serde_json::Value>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<serde_json::Value>,
}

impl Condition {
    /// Build an `eq` condition — the common case and the legacy-map target.
    pub fn eq(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            operator: FilterOperator::Eq,
            value: Some(value.into()),
            values: None,
            min: None,
            max: None,
        }
    }
}

/// Boolean combinator for a [`Group`]'s direct conditions and nested groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    /// All members must hold.
    And,
    /// At least one member must hold.
    Or,
}

impl Default for LogicalOp {
    fn default() -> Self {
        Self::And
    }
}

impl LogicalOp {
    fn sql_joiner(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A filter expression tree: direct conditions and nested sub-groups,
/// joined by one logical operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    /// How this group's members combine. Defaults to AND.
    #[serde(default)]
    pub logical_op: LogicalOp,
    /// Direct leaf conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Parenthesized nested groups.
    #[serde(default)]
    pub nested_groups: Vec<Group>,
}

impl Group {
    /// An empty AND-group — compiles to no predicate at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A flat AND of `eq` conditions — one per request, no required value.
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            logical_op: LogicalOp::And,
            conditions,
            nested_groups: Vec::new(),
        }
    }

    /// Build a group from a legacy `key -> value` equality map (spec §4.5
    /// "legacy simple map degrades to conjunctive equals"). Key order
    /// follows the map's iteration order.
    pub fn from_simple_map(map: HashMap<String, serde_json::Value>) -> Self {
        let conditions = map
            .into_iter()
            .map(|(key, value)| Condition {
                key,
                operator: FilterOperator::Eq,
                value: Some(value),
                values: None,
                min: None,
                max: None,
            })
            .collect();
        Self::and(conditions)
    }

    /// Whether this group (and all its nested groups) has nothing to compile.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.nested_groups.iter().all(Group::is_empty)
    }
}

/// Escape a JSONB key for embedding inside `metadata->>'<key>'` by doubling
/// single quotes (spec §4.5).
fn escape_key(key: &str) -> String {
    key.replace('\'', "''")
}

/// Render a scalar JSON value as the text it should be bound as, since every
/// condition compares against the `->>'key'` text extraction.
fn value_to_text(key: &str, value: &serde_json::Value) -> Result<String, FilterError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(FilterError::InvalidValueType {
            key: key.to_string(),
            reason: format!("expected a scalar, got {other}"),
        }),
    }
}

/// Accumulates bind arguments and hands out sequential `$n` placeholders.
struct ParamCursor {
    next: usize,
    args: Vec<String>,
}

impl ParamCursor {
    fn new(starting_index: usize) -> Self {
        Self {
            next: starting_index,
            args: Vec::new(),
        }
    }

    fn push(&mut self, value: String) -> usize {
        let idx = self.next;
        self.args.push(value);
        self.next += 1;
        idx
    }
}

fn compile_condition(
    cond: &Condition,
    table_prefix: &str,
    cursor: &mut ParamCursor,
) -> Result<String, FilterError> {
    let column = format!("{table_prefix}metadata->>'{}'", escape_key(&cond.key));

    Ok(match cond.operator {
        FilterOperator::IsNull => format!("{column} IS NULL"),
        FilterOperator::IsNotNull => format!("{column} IS NOT NULL"),
        FilterOperator::In | FilterOperator::Nin => {
            let values = cond.values.as_ref().filter(|v| !v.is_empty()).ok_or_else(|| {
                FilterError::MissingValues {
                    key: cond.key.clone(),
                }
            })?;
            let mut placeholders = Vec::with_capacity(values.len());
            for v in values {
                let text = value_to_text(&cond.key, v)?;
                placeholders.push(format!("${}", cursor.push(text)));
            }
            let keyword = if cond.operator == FilterOperator::In {
                "IN"
            } else {
                "NOT IN"
            };
            format!("{column} {keyword} ({})", placeholders.join(", "))
        }
        FilterOperator::Between => {
            let min = cond
                .min
                .as_ref()
                .ok_or_else(|| FilterError::MissingRange {
                    key: cond.key.clone(),
                })?;
            let max = cond
                .max
                .as_ref()
                .ok_or_else(|| FilterError::MissingRange {
                    key: cond.key.clone(),
                })?;
            let min_text = value_to_text(&cond.key, min)?;
            let max_text = value_to_text(&cond.key, max)?;
            let min_idx = cursor.push(min_text);
            let max_idx = cursor.push(max_text);
            format!("{column} BETWEEN ${min_idx} AND ${max_idx}")
        }
        _ => {
            let value = cond.value.as_ref().ok_or_else(|| FilterError::MissingValue {
                key: cond.key.clone(),
            })?;
            let text = value_to_text(&cond.key, value)?;
            let idx = cursor.push(text);
            format!("{column} {} ${idx}", cond.operator.sql_symbol())
        }
    })
}

fn compile_group(group: &Group, table_prefix: &str, cursor: &mut ParamCursor) -> Result<Option<String>, FilterError> {
    let mut parts = Vec::new();

    for cond in &group.conditions {
        parts.push(compile_condition(cond, table_prefix, cursor)?);
    }
    for nested in &group.nested_groups {
        if let Some(fragment) = compile_group(nested, table_prefix, cursor)? {
            parts.push(format!("({fragment})"));
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.join(group.logical_op.sql_joiner())))
}

/// Compile a filter [`Group`] into a `WHERE`-fragment (with no leading
/// `WHERE`/`AND` keyword) and its bind arguments, given the first available
/// `$n` parameter index. `table_prefix` is typically `"d."`/`"c."` or `""`.
///
/// Returns `Ok((None, starting_index, vec![]))`-equivalent — an empty
/// fragment — when the group has no conditions at all; callers should treat
/// `None` as "omit this predicate" rather than splicing in an empty string.
pub fn compile(
    group: &Group,
    starting_param_index: usize,
    table_prefix: &str,
) -> Result<(Option<String>, Vec<String>, usize), FilterError> {
    let mut cursor = ParamCursor::new(starting_param_index);
    let fragment = compile_group(group, table_prefix, &mut cursor)?;
    Ok((fragment, cursor.args, cursor.next))
}

/// The user-isolation predicate included whenever a caller id is known: the
/// caller sees their own items plus globally untagged ones (spec §4.5).
pub fn user_isolation_predicate(
    caller_id: &str,
    table_prefix: &str,
    starting_param_index: usize,
) -> (String, Vec<String>, usize) {
    let mut cursor = ParamCursor::new(starting_param_index);
    let idx = cursor.push(caller_id.to_string());
    let fragment = format!(
        "({table_prefix}metadata->>'user_id' = ${idx} OR {table_prefix}metadata->>'user_id' IS NULL OR NOT({table_prefix}metadata ? 'user_id'))"
    );
    (fragment, cursor.args, cursor.next)
}

/// A contains-all predicate over a `tags` array in `metadata` (spec §4.5
/// "tag predicate uses a contains-all operator").
pub fn tag_predicate(
    tags: &[String],
    table_prefix: &str,
    starting_param_index: usize,
) -> (String, Vec<String>, usize) {
    let mut cursor = ParamCursor::new(starting_param_index);
    let encoded = serde_json::to_string(&serde_json::json!(tags)).unwrap_or_else(|_| "[]".to_string());
    let idx = cursor.push(encoded);
    let fragment = format!("{table_prefix}metadata->'tags' @> ${idx}::jsonb");
    (fragment, cursor.args, cursor.next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_condition_compiles() {
        let group = Group::and(vec![Condition::eq("status", json!("active"))]);
        let (fragment, args, next) = compile(&group, 1, "").unwrap();
        assert_eq!(fragment.unwrap(), "metadata->>'status' = $1");
        assert_eq!(args, vec!["active"]);
        assert_eq!(next, 2);
    }

    #[test]
    fn table_prefix_is_applied() {
        let group = Group::and(vec![Condition::eq("kind", json!("doc"))]);
        let (fragment, _, _) = compile(&group, 1, "d.").unwrap();
        assert_eq!(fragment.unwrap(), "d.metadata->>'kind' = $1");
    }

    #[test]
    fn key_with_quote_is_escaped() {
        let group = Group::and(vec![Condition::eq("o'clock", json!("now"))]);
        let (fragment, _, _) = compile(&group, 1, "").unwrap();
        assert_eq!(fragment.unwrap(), "metadata->>'o''clock' = $1");
    }

    #[test]
    fn in_expands_positional_list() {
        let cond = Condition {
            key: "category".into(),
            operator: FilterOperator::In,
            value: None,
            values: Some(vec![json!("a"), json!("b"), json!("c")]),
            min: None,
            max: None,
        };
        let (fragment, args, next) = compile(&Group::and(vec![cond]), 5, "").unwrap();
        assert_eq!(fragment.unwrap(), "metadata->>'category' IN ($5, $6, $7)");
        assert_eq!(args, vec!["a", "b", "c"]);
        assert_eq!(next, 8);
    }

    #[test]
    fn between_consumes_two_params() {
        let cond = Condition {
            key: "score".into(),
            operator: FilterOperator::Between,
            value: None,
            values: None,
            min: Some(json!(1)),
            max: Some(json!(10)),
        };
        let (fragment, args, next) = compile(&Group::and(vec![cond]), 1, "").unwrap();
        assert_eq!(fragment.unwrap(), "metadata->>'score' BETWEEN $1 AND $2");
        assert_eq!(args, vec!["1", "10"]);
        assert_eq!(next, 3);
    }

    #[test]
    fn null_ops_take_zero_params() {
        let cond = Condition {
            key: "deleted_at".into(),
            operator: FilterOperator::IsNull,
            value: None,
            values: None,
            min: None,
            max: None,
        };
        let (fragment, args, next) = compile(&Group::and(vec![cond]), 3, "").unwrap();
        assert_eq!(fragment.unwrap(), "metadata->>'deleted_at' IS NULL");
        assert!(args.is_empty());
        assert_eq!(next, 3);
    }

    #[test]
    fn nested_groups_are_parenthesized_and_joined() {
        let inner = Group::and(vec![Condition::eq("a", json!(1)), Condition::eq("b", json!(2))]);
        let outer = Group {
            logical_op: LogicalOp::Or,
            conditions: vec![Condition::eq("c", json!(3))],
            nested_groups: vec![inner],
        };
        let (fragment, args, _) = compile(&outer, 1, "").unwrap();
        assert_eq!(
            fragment.unwrap(),
            "metadata->>'c' = $1 OR (metadata->>'a' = $2 AND metadata->>'b' = $3)"
        );
        assert_eq!(args, vec!["3", "1", "2"]);
    }

    #[test]
    fn missing_value_is_an_error() {
        let cond = Condition {
            key: "x".into(),
            operator: FilterOperator::Eq,
            value: None,
            values: None,
            min: None,
            max: None,
        };
        let err = compile(&Group::and(vec![cond]), 1, "").unwrap_err();
        assert_eq!(err, FilterError::MissingValue { key: "x".into() });
    }

    #[test]
    fn empty_in_list_is_an_error() {
        let cond = Condition {
            key: "x".into(),
            operator: FilterOperator::In,
            value: None,
            values: Some(vec![]),
            min: None,
            max: None,
        };
        let err = compile(&Group::and(vec![cond]), 1, "").unwrap_err();
        assert_eq!(err, FilterError::MissingValues { key: "x".into() });
    }

    #[test]
    fn unknown_operator_string_is_rejected() {
        let err = FilterOperator::parse("contains").unwrap_err();
        assert_eq!(err, FilterError::UnknownOperator("contains".into()));
    }

    #[test]
    fn empty_group_compiles_to_no_fragment() {
        let (fragment, args, next) = compile(&Group::empty(), 1, "").unwrap();
        assert!(fragment.is_none());
        assert!(args.is_empty());
        assert_eq!(next, 1);
    }

    #[test]
    fn legacy_simple_map_degrades_to_conjunctive_equals() {
        let mut map = HashMap::new();
        map.insert("status".to_string(), json!("ok"));
        let group = Group::from_simple_map(map);
        assert_eq!(group.logical_op, LogicalOp::And);
        assert_eq!(group.conditions.len(), 1);
    }

    #[test]
    fn user_isolation_predicate_shape() {
        let (fragment, args, next) = user_isolation_predicate("user-42", "", 1);
        assert_eq!(
            fragment,
            "(metadata->>'user_id' = $1 OR metadata->>'user_id' IS NULL OR NOT(metadata ? 'user_id'))"
        );
        assert_eq!(args, vec!["user-42"]);
        assert_eq!(next, 2);
    }

    #[test]
    fn tag_predicate_uses_contains_operator() {
        let (fragment, args, _) = tag_predicate(&["a".into(), "b".into()], "", 1);
        assert_eq!(fragment, "metadata->'tags' @> $1::jsonb");
        assert_eq!(args, vec![r#"["a","b"]"#]);
    }
}
