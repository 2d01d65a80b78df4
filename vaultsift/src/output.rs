//! JSON rendering of decrypted items.
//!
//! Each item is projected onto the selected columns, in column order, so
//! secrets only reach stdout when they were explicitly asked for.

use serde_json::{Map, Value};
use vaultsift_core::{Column, DecryptedItem, Result, SiftError};

/// Returns the value of one column for an item.
pub fn column_value(item: &DecryptedItem, column: Column) -> Value {
    match column {
        Column::Id => Value::from(item.id()),
        Column::FolderParentId => Value::from(item.folder_parent_id()),
        Column::Name => Value::from(item.name()),
        Column::Username => Value::from(item.username()),
        Column::Uri => Value::from(item.uri()),
        Column::Password => Value::from(item.password()),
        Column::Description => Value::from(item.description()),
        Column::CreatedTimestamp => Value::from(item.created().to_rfc3339()),
        Column::ModifiedTimestamp => Value::from(item.modified().to_rfc3339()),
    }
}

/// Projects items onto `columns`, keyed by each column's JSON key.
pub fn project(items: &[DecryptedItem], columns: &[Column]) -> Vec<Map<String, Value>> {
    items
        .iter()
        .map(|item| {
            columns
                .iter()
                .map(|&column| (column.json_key().to_string(), column_value(item, column)))
                .collect()
        })
        .collect()
}

/// Renders items as a pretty-printed JSON array.
///
/// # Errors
/// Returns a serialization error if rendering fails.
pub fn render_json(items: &[DecryptedItem], columns: &[Column]) -> Result<String> {
    serde_json::to_string_pretty(&project(items, columns)).map_err(|e| SiftError::Serialization {
        context: "JSON rendering".to_string(),
        source: e,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use vaultsift_core::{DEFAULT_COLUMNS, DecryptedFields, Record};

    fn item() -> DecryptedItem {
        let mut record = Record::new("res-1", "type-1");
        record.folder_parent_id = "folder-1".to_string();
        record.created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        record.modified = Utc.with_ymd_and_hms(2024, 4, 1, 8, 30, 0).unwrap();
        let fields = DecryptedFields::new("GitLab", "ops", "https://git.example", "hunter2", "ci");
        DecryptedItem::decrypted(0, Arc::new(record), fields)
    }

    #[test]
    fn test_default_columns_exclude_secrets() {
        let rows = project(&[item()], DEFAULT_COLUMNS);
        assert_eq!(rows.len(), 1);

        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["id", "folder_parent_id", "name", "username", "uri"]);
        assert!(!serde_json::to_string(&rows).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_projection_follows_column_order() {
        let columns = [Column::Password, Column::Name, Column::CreatedTimestamp];
        let rendered = render_json(&[item()], &columns).unwrap();
        let parsed: Vec<Map<String, Value>> = serde_json::from_str(&rendered).unwrap();

        let row = &parsed[0];
        assert_eq!(row["password"], "hunter2");
        assert_eq!(row["name"], "GitLab");
        assert_eq!(row["created_timestamp"], "2024-03-01T12:00:00+00:00");

        let password_at = rendered.find("\"password\"").unwrap();
        let name_at = rendered.find("\"name\"").unwrap();
        assert!(password_at < name_at);
    }

    #[test]
    fn test_empty_items_render_empty_array() {
        assert_eq!(render_json(&[], DEFAULT_COLUMNS).unwrap(), "[]");
    }
}
