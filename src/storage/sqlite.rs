//! SQLite backend implementation

use super::schema;
use super::SqlStore;
use crate::codec::EncodedRow;
use crate::collection::CollectionKind;
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite-backed storage for `Remote` collections and the global namespace
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::backend("sqlite open", e))?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::backend("sqlite open", e))?;
        Ok(Self { conn })
    }

    /// Helper to read `(object, type)` columns starting at `base`
    fn row_columns(row: &rusqlite::Row, base: usize) -> rusqlite::Result<EncodedRow> {
        Ok(EncodedRow {
            payload: row.get(base)?,
            tag: row.get(base + 1)?,
        })
    }
}

impl SqlStore for SqliteStore {
    fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::backend("table probe", e))?;
        Ok(found.is_some())
    }

    fn create_table(&self, kind: CollectionKind, table: &str) -> Result<()> {
        self.conn
            .execute(&schema::create_table_sql(kind, table), [])
            .map_err(|e| Error::backend("create table", e))?;
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", table), [])
            .map_err(|e| Error::backend("drop table", e))?;
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(|e| Error::backend("count", e))?;
        Ok(count as usize)
    }

    fn table_names(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1")
            .map_err(|e| Error::backend("table scan", e))?;
        let names = stmt
            .query_map([format!("{}%", prefix)], |row| row.get::<_, String>(0))
            .map_err(|e| Error::backend("table scan", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::backend("table scan", e))?;
        // LIKE treats '_' as a single-character wildcard, so the pattern can
        // overmatch; re-check the literal prefix.
        Ok(names.into_iter().filter(|n| n.starts_with(prefix)).collect())
    }

    // ========== List tables ==========

    fn list_get(&self, table: &str, index: usize) -> Result<Option<EncodedRow>> {
        self.conn
            .query_row(
                &format!("SELECT object, type FROM {} WHERE idx = ?1", table),
                [index as i64],
                |row| Self::row_columns(row, 0),
            )
            .optional()
            .map_err(|e| Error::backend("list get", e))
    }

    fn list_put(&self, table: &str, index: usize, row: &EncodedRow) -> Result<()> {
        self.conn
            .execute(
                &format!("INSERT INTO {} (idx, object, type) VALUES (?1, ?2, ?3)", table),
                params![index as i64, row.payload, row.tag],
            )
            .map_err(|e| Error::backend("list put", e))?;
        Ok(())
    }

    fn list_set(&self, table: &str, index: usize, row: &EncodedRow) -> Result<()> {
        let changed = self
            .conn
            .execute(
                &format!("UPDATE {} SET object = ?2, type = ?3 WHERE idx = ?1", table),
                params![index as i64, row.payload, row.tag],
            )
            .map_err(|e| Error::backend("list set", e))?;
        if changed == 0 {
            return Err(Error::backend(
                "list set",
                rusqlite::Error::QueryReturnedNoRows,
            ));
        }
        Ok(())
    }

    fn list_remove(&self, table: &str, index: usize) -> Result<()> {
        self.conn
            .execute(
                &format!("DELETE FROM {} WHERE idx = ?1", table),
                [index as i64],
            )
            .map_err(|e| Error::backend("list remove", e))?;
        // Re-index in two phases through negative space so the shifted rows
        // never collide with a still-occupied primary key.
        self.conn
            .execute(
                &format!("UPDATE {} SET idx = -(idx - 1) WHERE idx > ?1", table),
                [index as i64],
            )
            .map_err(|e| Error::backend("list remove", e))?;
        self.conn
            .execute(&format!("UPDATE {} SET idx = -idx WHERE idx < 0", table), [])
            .map_err(|e| Error::backend("list remove", e))?;
        Ok(())
    }

    fn list_rows(&self, table: &str) -> Result<Vec<EncodedRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT object, type FROM {} ORDER BY idx", table))
            .map_err(|e| Error::backend("list scan", e))?;
        let rows = stmt
            .query_map([], |row| Self::row_columns(row, 0))
            .map_err(|e| Error::backend("list scan", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::backend("list scan", e))?;
        Ok(rows)
    }

    // ========== Map tables ==========

    fn map_get(&self, table: &str, key: &EncodedRow) -> Result<Option<EncodedRow>> {
        // Keys with an absent payload (None, Boolean(false)) match on IS NULL
        let result = match &key.payload {
            Some(payload) => self
                .conn
                .query_row(
                    &format!(
                        "SELECT value_object, value_type FROM {} \
                         WHERE key_object = ?1 AND key_type = ?2",
                        table
                    ),
                    params![payload, key.tag],
                    |row| Self::row_columns(row, 0),
                )
                .optional(),
            None => self
                .conn
                .query_row(
                    &format!(
                        "SELECT value_object, value_type FROM {} \
                         WHERE key_object IS NULL AND key_type = ?1",
                        table
                    ),
                    params![key.tag],
                    |row| Self::row_columns(row, 0),
                )
                .optional(),
        };
        result.map_err(|e| Error::backend("map get", e))
    }

    fn map_put(&self, table: &str, key: &EncodedRow, value: &EncodedRow) -> Result<()> {
        self.map_remove(table, key)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (key_object, key_type, value_object, value_type) \
                     VALUES (?1, ?2, ?3, ?4)",
                    table
                ),
                params![key.payload, key.tag, value.payload, value.tag],
            )
            .map_err(|e| Error::backend("map put", e))?;
        Ok(())
    }

    fn map_remove(&self, table: &str, key: &EncodedRow) -> Result<Option<EncodedRow>> {
        let previous = self.map_get(table, key)?;
        if previous.is_some() {
            match &key.payload {
                Some(payload) => self
                    .conn
                    .execute(
                        &format!(
                            "DELETE FROM {} WHERE key_object = ?1 AND key_type = ?2",
                            table
                        ),
                        params![payload, key.tag],
                    )
                    .map_err(|e| Error::backend("map remove", e))?,
                None => self
                    .conn
                    .execute(
                        &format!(
                            "DELETE FROM {} WHERE key_object IS NULL AND key_type = ?1",
                            table
                        ),
                        params![key.tag],
                    )
                    .map_err(|e| Error::backend("map remove", e))?,
            };
        }
        Ok(previous)
    }

    fn map_rows(&self, table: &str) -> Result<Vec<(EncodedRow, EncodedRow)>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT key_object, key_type, value_object, value_type FROM {}",
                table
            ))
            .map_err(|e| Error::backend("map scan", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((Self::row_columns(row, 0)?, Self::row_columns(row, 2)?))
            })
            .map_err(|e| Error::backend("map scan", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::backend("map scan", e))?;
        Ok(rows)
    }

    // ========== Named-map tables ==========

    fn named_get(&self, table: &str, name: &str) -> Result<Option<EncodedRow>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT value_object, value_type FROM {} WHERE name = ?1",
                    table
                ),
                [name],
                |row| Self::row_columns(row, 0),
            )
            .optional()
            .map_err(|e| Error::backend("named get", e))
    }

    fn named_put(&self, table: &str, name: &str, value: &EncodedRow) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (name, value_object, value_type) \
                     VALUES (?1, ?2, ?3)",
                    table
                ),
                params![name, value.payload, value.tag],
            )
            .map_err(|e| Error::backend("named put", e))?;
        Ok(())
    }

    fn named_remove(&self, table: &str, name: &str) -> Result<Option<EncodedRow>> {
        let previous = self.named_get(table, name)?;
        if previous.is_some() {
            self.conn
                .execute(&format!("DELETE FROM {} WHERE name = ?1", table), [name])
                .map_err(|e| Error::backend("named remove", e))?;
        }
        Ok(previous)
    }

    fn named_rows(&self, table: &str) -> Result<Vec<(String, EncodedRow)>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT name, value_object, value_type FROM {} ORDER BY name",
                table
            ))
            .map_err(|e| Error::backend("named scan", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, Self::row_columns(row, 1)?)))
            .map_err(|e| Error::backend("named scan", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::backend("named scan", e))?;
        Ok(rows)
    }

    fn clear(&self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!("DELETE FROM {}", table), [])
            .map_err(|e| Error::backend("clear", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(s: &str) -> EncodedRow {
        EncodedRow { payload: Some(s.to_string()), tag: 3 }
    }

    #[test]
    fn test_table_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.table_exists("vs_l1").unwrap());

        store.create_table(CollectionKind::List, "vs_l1").unwrap();
        assert!(store.table_exists("vs_l1").unwrap());
        assert_eq!(store.count("vs_l1").unwrap(), 0);

        store.drop_table("vs_l1").unwrap();
        assert!(!store.table_exists("vs_l1").unwrap());
    }

    #[test]
    fn test_table_names_matches_literal_prefix() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::List, "vs_l1").unwrap();
        store.create_table(CollectionKind::Map, "vs_d2").unwrap();
        store.create_table(CollectionKind::Named, "vs_globals").unwrap();
        // '_' in the prefix must not act as a LIKE wildcard
        store.create_table(CollectionKind::List, "vsxl9").unwrap();

        let mut names = store.table_names("vs_").unwrap();
        names.sort();
        assert_eq!(names, vec!["vs_d2", "vs_globals", "vs_l1"]);
    }

    #[test]
    fn test_list_put_get_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::List, "vs_l1").unwrap();

        store.list_put("vs_l1", 0, &text_row("a")).unwrap();
        store.list_put("vs_l1", 1, &text_row("b")).unwrap();

        assert_eq!(store.list_get("vs_l1", 0).unwrap().unwrap(), text_row("a"));
        assert_eq!(store.list_get("vs_l1", 5).unwrap(), None);

        store.list_set("vs_l1", 1, &text_row("B")).unwrap();
        assert_eq!(store.list_get("vs_l1", 1).unwrap().unwrap(), text_row("B"));
        assert!(store.list_set("vs_l1", 9, &text_row("x")).is_err());
    }

    #[test]
    fn test_list_remove_reindexes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::List, "vs_l1").unwrap();
        for (i, s) in ["a", "b", "c", "d"].iter().enumerate() {
            store.list_put("vs_l1", i, &text_row(s)).unwrap();
        }

        store.list_remove("vs_l1", 1).unwrap();

        assert_eq!(store.count("vs_l1").unwrap(), 3);
        let rows = store.list_rows("vs_l1").unwrap();
        assert_eq!(
            rows,
            vec![text_row("a"), text_row("c"), text_row("d")]
        );
        // Indices are contiguous again
        assert_eq!(store.list_get("vs_l1", 2).unwrap().unwrap(), text_row("d"));
    }

    #[test]
    fn test_map_null_payload_keys() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::Map, "vs_d1").unwrap();

        let none_key = EncodedRow { payload: None, tag: 0 };
        let false_key = EncodedRow { payload: None, tag: 4 };

        store.map_put("vs_d1", &none_key, &text_row("for-none")).unwrap();
        store.map_put("vs_d1", &false_key, &text_row("for-false")).unwrap();

        // Same absent payload, distinguished only by key_type
        assert_eq!(
            store.map_get("vs_d1", &none_key).unwrap().unwrap(),
            text_row("for-none")
        );
        assert_eq!(
            store.map_get("vs_d1", &false_key).unwrap().unwrap(),
            text_row("for-false")
        );

        assert_eq!(
            store.map_remove("vs_d1", &none_key).unwrap().unwrap(),
            text_row("for-none")
        );
        assert_eq!(store.map_get("vs_d1", &none_key).unwrap(), None);
        assert_eq!(store.count("vs_d1").unwrap(), 1);
    }

    #[test]
    fn test_map_put_replaces() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::Map, "vs_d1").unwrap();

        let key = text_row("k");
        store.map_put("vs_d1", &key, &text_row("v1")).unwrap();
        store.map_put("vs_d1", &key, &text_row("v2")).unwrap();

        assert_eq!(store.count("vs_d1").unwrap(), 1);
        assert_eq!(store.map_get("vs_d1", &key).unwrap().unwrap(), text_row("v2"));
    }

    #[test]
    fn test_named_upsert_and_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(CollectionKind::Named, "vs_globals").unwrap();

        store.named_put("vs_globals", "beta", &text_row("2")).unwrap();
        store.named_put("vs_globals", "alpha", &text_row("1")).unwrap();
        store.named_put("vs_globals", "alpha", &text_row("one")).unwrap();

        assert_eq!(
            store.named_get("vs_globals", "alpha").unwrap().unwrap(),
            text_row("one")
        );
        assert_eq!(store.named_get("vs_globals", "missing").unwrap(), None);

        let rows = store.named_rows("vs_globals").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "alpha");

        assert_eq!(
            store.named_remove("vs_globals", "beta").unwrap().unwrap(),
            text_row("2")
        );
        assert_eq!(store.named_remove("vs_globals", "beta").unwrap(), None);

        store.clear("vs_globals").unwrap();
        assert_eq!(store.count("vs_globals").unwrap(), 0);
    }
}
