//! Database schema generation (SQLite dialect)
//!
//! DDL is derived from the registry rather than hardcoded: one table per
//! entity type, one table per join table. Non-key columns are declared
//! without affinity so they store [`crate::Value`] variants verbatim.

use crate::Result;
use crate::schema::{EntityDef, RelationDef, SchemaRegistry};

/// SQL to create the table backing one entity type
pub fn create_entity_table_sql(def: &EntityDef) -> String {
    let mut columns: Vec<String> = Vec::new();
    if def.auto_increment {
        columns.push(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            def.key_columns[0]
        ));
    } else {
        columns.extend(def.key_columns.iter().map(|c| c.to_string()));
    }
    columns.extend(def.fields.iter().map(|f| f.to_string()));
    if !def.auto_increment {
        columns.push(format!("PRIMARY KEY ({})", def.key_columns.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        def.table,
        columns.join(",\n    ")
    )
}

/// SQL to create the join table backing one relation. Every column is part
/// of the composite primary key.
pub fn create_join_table_sql(rel: &RelationDef) -> String {
    let columns = rel.all_columns();
    let mut body: Vec<String> = columns.iter().map(|c| format!("{} NOT NULL", c)).collect();
    body.push(format!("PRIMARY KEY ({})", columns.join(", ")));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        rel.join_table,
        body.join(",\n    ")
    )
}

/// All schema creation statements for a registry. Join tables shared by a
/// bidirectional relation pair appear once.
pub fn all_schema_statements(registry: &SchemaRegistry) -> Result<Vec<String>> {
    let mut statements: Vec<String> = registry
        .entities()
        .iter()
        .map(create_entity_table_sql)
        .collect();

    let mut seen_tables: Vec<&str> = Vec::new();
    for rel in registry.relations() {
        if seen_tables.contains(&rel.join_table.as_str()) {
            continue;
        }
        seen_tables.push(&rel.join_table);
        statements.push(create_join_table_sql(rel));
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PayloadDef, RelationDef, SchemaRegistry};

    #[test]
    fn test_entity_ddl() {
        let auto = EntityDef::new("user", "users").with_field("name");
        let sql = create_entity_table_sql(&auto);
        assert!(sql.contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("name"));

        let composite =
            EntityDef::new("membership", "memberships").with_key_columns(&["org_id", "seq"]);
        let sql = create_entity_table_sql(&composite);
        assert!(sql.contains("PRIMARY KEY (org_id, seq)"));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_join_ddl_has_composite_key() {
        let rel = RelationDef::new("groups", "user", "group", "user_group")
            .with_owner_columns(&["user_id"])
            .with_related_columns(&["group_id"])
            .with_payload(PayloadDef::scalar("role", "role"));
        let sql = create_join_table_sql(&rel);
        assert!(sql.contains("PRIMARY KEY (user_id, group_id, role)"));
    }

    #[test]
    fn test_shared_join_table_emitted_once() {
        let registry = SchemaRegistry::builder()
            .entity(EntityDef::new("user", "users"))
            .relation(
                RelationDef::new("friends", "user", "user", "user_friend")
                    .with_owner_columns(&["user_id"])
                    .with_related_columns(&["friend_id"])
                    .with_inverse("whos"),
            )
            .relation(
                RelationDef::new("whos", "user", "user", "user_friend")
                    .with_owner_columns(&["friend_id"])
                    .with_related_columns(&["user_id"])
                    .with_inverse("friends"),
            )
            .build()
            .unwrap();

        let statements = all_schema_statements(&registry).unwrap();
        let join_count = statements
            .iter()
            .filter(|s| s.contains("user_friend"))
            .count();
        assert_eq!(join_count, 1);
    }
}
