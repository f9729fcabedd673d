//! Deterministic SQL-result summary construction (spec §4.8: "Summary
//! generation is deterministic string construction").

use serde_json::Value;

/// Build the summary string for a tool result that returned `rows` from
/// `tables`, optionally truncated to `cap` rows.
///
/// Format: `"<bot> returned N row(s) from tables [t1,t2]"` plus a sample
/// of up to 3 values of the first column when present; 0 rows yields
/// `"no data matches"`; when capped, appends `"limited to K"`.
pub fn summarize_rows(bot_name: &str, tables: &[String], rows: &[Value], cap: Option<usize>) -> String {
    if rows.is_empty() {
        return format!("{bot_name} returned no data matches");
    }

    let table_list = tables.join(",");
    let (reported_rows, limited) = match cap {
        Some(cap) if rows.len() > cap => (&rows[..cap], true),
        _ => (rows, false),
    };

    let mut summary = format!(
        "{bot_name} returned {} row(s) from tables [{table_list}]",
        reported_rows.len()
    );

    let sample: Vec<String> = reported_rows
        .iter()
        .take(3)
        .filter_map(first_column_value)
        .collect();
    if !sample.is_empty() {
        summary.push_str(&format!(", sample: {}", sample.join(", ")));
    }

    if limited {
        summary.push_str(&format!(", limited to {}", reported_rows.len()));
    }

    summary
}

fn first_column_value(row: &Value) -> Option<String> {
    match row {
        Value::Object(map) => map.values().next().map(render_scalar),
        _ => None,
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_rows_reports_no_data() {
        assert_eq!(summarize_rows("bot", &["users".to_string()], &[], None), "bot returned no data matches");
    }

    #[test]
    fn reports_row_count_and_tables() {
        let rows = vec![json!({"id": 1}), json!({"id": 2})];
        let summary = summarize_rows("bot", &["users".to_string(), "orders".to_string()], &rows, None);
        assert!(summary.starts_with("bot returned 2 row(s) from tables [users,orders]"));
        assert!(summary.contains("sample: 1, 2"));
    }

    #[test]
    fn caps_and_notes_limited() {
        let rows = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3}), json!({"id": 4})];
        let summary = summarize_rows("bot", &["users".to_string()], &rows, Some(2));
        assert!(summary.contains("2 row(s)"));
        assert!(summary.ends_with("limited to 2"));
    }
}
