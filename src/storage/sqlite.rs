//! SQLite storage implementation

use super::schema;
use super::{EdgeRow, StorageAdapter};
use crate::schema::{EntityDef, RelationDef, SchemaRegistry};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::{Connection, params_from_iter};
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite-backed storage for entity and join tables
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create all tables declared by the registry
    pub fn initialize_schema(&self, registry: &SchemaRegistry) -> Result<()> {
        for stmt in schema::all_schema_statements(registry)? {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    /// Count rows in a table (stats and tests)
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Load one entity row's declared fields by primary key
    pub fn load_entity_fields(
        &self,
        def: &EntityDef,
        key: &[Value],
    ) -> Result<Option<BTreeMap<String, Value>>> {
        if def.fields.is_empty() {
            return Ok(Some(BTreeMap::new()));
        }
        let predicate = column_predicate(&def.key_columns);
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            def.fields.join(", "),
            def.table,
            predicate
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(key.iter()))?;
        match rows.next()? {
            Some(row) => {
                let mut fields = BTreeMap::new();
                for (i, name) in def.fields.iter().enumerate() {
                    fields.insert(name.clone(), row.get::<_, Value>(i)?);
                }
                Ok(Some(fields))
            }
            None => Ok(None),
        }
    }
}

/// `c1 = ?1 AND c2 = ?2 AND ...` for the given columns
fn column_predicate(columns: &[String]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageAdapter for SqliteStore {
    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn persist_entity(
        &mut self,
        def: &EntityDef,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Vec<Value>> {
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !def.auto_increment {
            for key_column in &def.key_columns {
                let value = fields
                    .get(key_column)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| {
                        Error::MissingField(format!(
                            "key column '{}' of entity '{}' has no value",
                            key_column, def.name
                        ))
                    })?;
                columns.push(key_column);
                values.push(value.clone());
            }
        }
        for field in &def.fields {
            columns.push(field);
            values.push(fields.get(field).cloned().unwrap_or(Value::Null));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            def.table,
            columns.join(", "),
            placeholders(columns.len())
        );
        self.conn
            .execute(&sql, params_from_iter(values.iter()))?;

        if def.auto_increment {
            Ok(vec![Value::Integer(self.conn.last_insert_rowid())])
        } else {
            Ok(values[..def.key_columns.len()].to_vec())
        }
    }

    fn insert_edge_row(&mut self, table: &str, columns: &[(String, Value)]) -> Result<()> {
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders(columns.len())
        );
        self.conn
            .execute(&sql, params_from_iter(columns.iter().map(|(_, v)| v)))?;
        Ok(())
    }

    fn delete_edge_row(&mut self, table: &str, key_columns: &[(String, Value)]) -> Result<()> {
        let names: Vec<String> = key_columns.iter().map(|(n, _)| n.clone()).collect();
        let sql = format!("DELETE FROM {} WHERE {}", table, column_predicate(&names));
        self.conn.execute(
            &sql,
            params_from_iter(key_columns.iter().map(|(_, v)| v)),
        )?;
        Ok(())
    }

    fn load_edges(&mut self, relation: &RelationDef, owner_key: &[Value]) -> Result<Vec<EdgeRow>> {
        let related_count = relation.related_columns.len();
        let select: Vec<&str> = relation
            .related_columns
            .iter()
            .map(String::as_str)
            .chain(relation.payload.iter().map(|p| p.column.as_str()))
            .collect();
        // rowid order preserves first-insertion order for the committed set
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY rowid",
            select.join(", "),
            relation.join_table,
            column_predicate(&relation.owner_columns)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(owner_key.iter()), |row| {
            let mut related_key = Vec::with_capacity(related_count);
            for i in 0..related_count {
                related_key.push(row.get::<_, Value>(i)?);
            }
            let mut payload = Vec::with_capacity(relation.payload.len());
            for i in 0..relation.payload.len() {
                payload.push(row.get::<_, Value>(related_count + i)?);
            }
            Ok(EdgeRow {
                related_key,
                payload,
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}
