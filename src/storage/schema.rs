//! Database schema definitions.
//!
//! One registry table maps series names to numeric ids and storage types.
//! Values live in one table per storage type, indexed by `(id, ts)`.
//! The value tables carry no primary key so that equal timestamps never
//! abort a whole batch.

use super::types::StorageType;

/// Series registry.
pub const DATAPOINTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS datapoints (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    type INTEGER NOT NULL
);
"#;

/// Numeric values.
pub const TS_NUMBER_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ts_number (
    id    INTEGER NOT NULL,
    ts    INTEGER NOT NULL,
    val   REAL,
    ack   INTEGER,
    _from TEXT,
    q     INTEGER
);
"#;

pub const TS_NUMBER_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS ts_number_id_ts ON ts_number (id, ts);";

/// Text values.
pub const TS_STRING_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ts_string (
    id    INTEGER NOT NULL,
    ts    INTEGER NOT NULL,
    val   TEXT,
    ack   INTEGER,
    _from TEXT,
    q     INTEGER
);
"#;

pub const TS_STRING_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS ts_string_id_ts ON ts_string (id, ts);";

/// Boolean values, stored as 0/1.
pub const TS_BOOL_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ts_bool (
    id    INTEGER NOT NULL,
    ts    INTEGER NOT NULL,
    val   INTEGER,
    ack   INTEGER,
    _from TEXT,
    q     INTEGER
);
"#;

pub const TS_BOOL_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS ts_bool_id_ts ON ts_bool (id, ts);";

/// Value table for a storage type.
pub fn value_table(storage_type: StorageType) -> &'static str {
    match storage_type {
        StorageType::Number => "ts_number",
        StorageType::String => "ts_string",
        StorageType::Boolean => "ts_bool",
    }
}

/// All schema statements in creation order, one statement each.
pub fn all_ddl() -> [&'static str; 7] {
    [
        DATAPOINTS_TABLE_DDL,
        TS_NUMBER_TABLE_DDL,
        TS_NUMBER_INDEX_DDL,
        TS_STRING_TABLE_DDL,
        TS_STRING_INDEX_DDL,
        TS_BOOL_TABLE_DDL,
        TS_BOOL_INDEX_DDL,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_tables_are_distinct() {
        assert_eq!(value_table(StorageType::Number), "ts_number");
        assert_eq!(value_table(StorageType::String), "ts_string");
        assert_eq!(value_table(StorageType::Boolean), "ts_bool");
    }

    #[test]
    fn test_every_value_table_has_ddl() {
        let ddl = all_ddl().join("\n");
        for t in [StorageType::Number, StorageType::String, StorageType::Boolean] {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {}", value_table(t))));
        }
    }

    #[test]
    fn test_ddl_statements_are_single() {
        for ddl in all_ddl() {
            assert_eq!(ddl.trim().matches(';').count(), 1, "{ddl}");
            assert!(ddl.trim().ends_with(';'));
        }
    }
}
