//! Backend table schema definitions
//!
//! Table names are `<prefix><kind-char><identity>`: kind chars are `l`
//! (list), `d` (map) and `s` (named map). The global-variable table uses the
//! fixed suffix `globals` instead of an identity.
//!
//! The column named `index` in the original schema is `idx` here: `INDEX` is
//! a reserved word in MySQL and an unquoted name keeps the DDL portable
//! across both dialects.

use crate::collection::CollectionKind;

/// DDL for a list table: contiguous 0-based `idx`, row payload + tag
pub fn create_list_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         idx INTEGER PRIMARY KEY, \
         object TEXT, \
         type TINYINT NOT NULL)",
        table
    )
}

/// DDL for a map table: encoded key columns + encoded value columns
pub fn create_map_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         key_object TEXT, \
         key_type TINYINT NOT NULL, \
         value_object TEXT, \
         value_type TINYINT NOT NULL)",
        table
    )
}

/// DDL for a named-map table: short string keys (the variable namespace)
pub fn create_named_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         name VARCHAR(100) PRIMARY KEY, \
         value_object TEXT, \
         value_type TINYINT NOT NULL)",
        table
    )
}

/// DDL for the right table shape of a collection kind
pub fn create_table_sql(kind: CollectionKind, table: &str) -> String {
    match kind {
        CollectionKind::List => create_list_table(table),
        CollectionKind::Map => create_map_table(table),
        CollectionKind::Named => create_named_table(table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_names_the_table() {
        for kind in [CollectionKind::List, CollectionKind::Map, CollectionKind::Named] {
            let sql = create_table_sql(kind, "vs_t1");
            assert!(sql.contains("vs_t1"), "{sql}");
            assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS"));
        }
    }
}
