//! Output formatting for CLI commands

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use serde_json::{json, Map, Value as JsonValue};
use typeframe_schema::{SchemaBoundTable, Value};

/// Print a table with cyan headers.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print the rows of a typed table.
pub fn print_frame(table: &SchemaBoundTable) {
    let names = table.column_names();
    let headers: Vec<&str> = names.iter().map(String::as_str).collect();
    let rows = table
        .to_rows()
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    print_table(&headers, rows);
}

/// Cell text: nulls are blank, text is unquoted.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.text_form().unwrap_or_default(),
    }
}

pub fn value_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Text(v) => json!(v),
        Value::Date(v) => json!(v.format("%Y-%m-%d").to_string()),
    }
}

/// Rows as JSON objects keyed by column name.
pub fn rows_json(table: &SchemaBoundTable) -> Vec<JsonValue> {
    let names = table.column_names();
    table
        .to_rows()
        .iter()
        .map(|row| {
            let object: Map<String, JsonValue> = names
                .iter()
                .cloned()
                .zip(row.iter().map(value_json))
                .collect();
            JsonValue::Object(object)
        })
        .collect()
}
