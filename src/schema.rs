//! Schema registry - config-driven entity and relation declarations
//!
//! The registry replaces runtime type lookup with an explicit table mapping
//! relation name -> entity types + payload schema. Declarations are plain
//! serde-friendly data, so a registry can be built in code or loaded from
//! TOML/JSON.
//!
//! - [`EntityDef`]: one entity type and its storage table
//! - [`RelationDef`]: one many-to-many relation backed by a join table
//! - [`PayloadDef`]: one extra join-key column (scalar or entity-typed)
//! - [`SchemaRegistry`]: validated collection of the above

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Declaration of one entity type: its logical name, storage table, primary
/// key columns, and non-key field columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Logical entity type name, e.g. `"user"`
    pub name: String,
    /// Storage table name
    pub table: String,
    /// Primary key column(s), in canonical order
    pub key_columns: Vec<String>,
    /// Whether storage assigns the key on insert (single integer column)
    pub auto_increment: bool,
    /// Non-key field columns
    pub fields: Vec<String>,
}

impl EntityDef {
    /// Create an entity definition with a storage-assigned integer key `id`
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_columns: vec!["id".to_string()],
            auto_increment: true,
            fields: Vec::new(),
        }
    }

    /// Use caller-assigned key columns instead of an auto-increment id
    pub fn with_key_columns(mut self, columns: &[&str]) -> Self {
        self.key_columns = columns.iter().map(|c| c.to_string()).collect();
        self.auto_increment = false;
        self
    }

    /// Add a non-key field column
    pub fn with_field(mut self, field: &str) -> Self {
        self.fields.push(field.to_string());
        self
    }
}

/// Kind of a payload slot: a plain scalar column, or a foreign key to
/// another entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Scalar,
    Entity(String),
}

/// Declaration of one payload slot on a relation. The payload column is part
/// of the join table's composite primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDef {
    /// Slot name, e.g. `"role"`
    pub name: String,
    /// Join-table column backing this slot
    pub column: String,
    pub kind: PayloadKind,
}

impl PayloadDef {
    pub fn scalar(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            kind: PayloadKind::Scalar,
        }
    }

    pub fn entity(
        name: impl Into<String>,
        column: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            kind: PayloadKind::Entity(entity_type.into()),
        }
    }
}

/// Declaration of one many-to-many relation, viewed from its owning side.
///
/// A bidirectional relation is declared twice (once per side) with the
/// `inverse` fields naming each other; both sides share the join table with
/// owner/related columns swapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name, unique per owner entity type, e.g. `"friends"`
    pub name: String,
    /// Entity type owning this side of the relation
    pub owner_entity: String,
    /// Join-table columns referencing the owner's key columns
    pub owner_columns: Vec<String>,
    /// Entity type on the far side
    pub related_entity: String,
    /// Join-table columns referencing the related entity's key columns
    pub related_columns: Vec<String>,
    /// Cross-reference table name
    pub join_table: String,
    /// Extra join-key slots, fixed arity per relation
    #[serde(default)]
    pub payload: Vec<PayloadDef>,
    /// Name of the partner relation declared on `related_entity`, if this
    /// relation is bidirectional
    #[serde(default)]
    pub inverse: Option<String>,
}

impl RelationDef {
    pub fn new(
        name: impl Into<String>,
        owner_entity: impl Into<String>,
        related_entity: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner_entity: owner_entity.into(),
            owner_columns: Vec::new(),
            related_entity: related_entity.into(),
            related_columns: Vec::new(),
            join_table: join_table.into(),
            payload: Vec::new(),
            inverse: None,
        }
    }

    pub fn with_owner_columns(mut self, columns: &[&str]) -> Self {
        self.owner_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_related_columns(mut self, columns: &[&str]) -> Self {
        self.related_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_payload(mut self, payload: PayloadDef) -> Self {
        self.payload.push(payload);
        self
    }

    pub fn with_inverse(mut self, partner: &str) -> Self {
        self.inverse = Some(partner.to_string());
        self
    }

    /// All join-table columns of this relation, owner side first. The full
    /// set is the join table's composite primary key.
    pub fn all_columns(&self) -> Vec<&str> {
        self.owner_columns
            .iter()
            .chain(self.related_columns.iter())
            .map(String::as_str)
            .chain(self.payload.iter().map(|p| p.column.as_str()))
            .collect()
    }
}

/// Validated set of entity and relation declarations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    entities: Vec<EntityDef>,
    relations: Vec<RelationDef>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Load a registry from a JSON string and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let registry: SchemaRegistry = serde_json::from_str(json)
            .map_err(|e| Error::InvalidSchema(format!("JSON parse failed: {}", e)))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Serialize the registry to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidSchema(format!("JSON serialization failed: {}", e)))
    }

    /// Look up an entity definition by logical name
    pub fn entity(&self, name: &str) -> Result<&EntityDef> {
        self.entities
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))
    }

    /// Look up a relation by owning entity type and relation name
    pub fn relation(&self, owner_entity: &str, name: &str) -> Result<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.owner_entity == owner_entity && r.name == name)
            .ok_or_else(|| Error::UnknownRelation(format!("{}.{}", owner_entity, name)))
    }

    /// All relations owned by the given entity type
    pub fn relations_of(&self, owner_entity: &str) -> impl Iterator<Item = &RelationDef> {
        self.relations
            .iter()
            .filter(move |r| r.owner_entity == owner_entity)
    }

    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    fn validate(&self) -> Result<()> {
        for (i, entity) in self.entities.iter().enumerate() {
            if entity.name.is_empty() {
                return Err(Error::InvalidSchema("entity name is empty".into()));
            }
            if self.entities[..i].iter().any(|e| e.name == entity.name) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate entity type '{}'",
                    entity.name
                )));
            }
            if entity.key_columns.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "entity '{}' has no key columns",
                    entity.name
                )));
            }
            if entity.auto_increment && entity.key_columns.len() != 1 {
                return Err(Error::InvalidSchema(format!(
                    "entity '{}' is auto-increment but has a composite key",
                    entity.name
                )));
            }
            if entity
                .fields
                .iter()
                .any(|f| entity.key_columns.contains(f))
            {
                return Err(Error::InvalidSchema(format!(
                    "entity '{}' declares a key column as a field",
                    entity.name
                )));
            }
        }

        for (i, rel) in self.relations.iter().enumerate() {
            let label = format!("{}.{}", rel.owner_entity, rel.name);
            if self.relations[..i]
                .iter()
                .any(|r| r.owner_entity == rel.owner_entity && r.name == rel.name)
            {
                return Err(Error::InvalidSchema(format!(
                    "duplicate relation '{}'",
                    label
                )));
            }
            let owner = self.entity(&rel.owner_entity)?;
            let related = self.entity(&rel.related_entity)?;
            if rel.owner_columns.len() != owner.key_columns.len() {
                return Err(Error::InvalidSchema(format!(
                    "relation '{}': owner column count does not match '{}' key",
                    label, owner.name
                )));
            }
            if rel.related_columns.len() != related.key_columns.len() {
                return Err(Error::InvalidSchema(format!(
                    "relation '{}': related column count does not match '{}' key",
                    label, related.name
                )));
            }
            if rel.join_table.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "relation '{}' has no join table",
                    label
                )));
            }
            let columns = rel.all_columns();
            for (j, col) in columns.iter().enumerate() {
                if columns[..j].contains(col) {
                    return Err(Error::InvalidSchema(format!(
                        "relation '{}': duplicate join column '{}'",
                        label, col
                    )));
                }
            }
            for slot in &rel.payload {
                if let PayloadKind::Entity(target) = &slot.kind {
                    let target_def = self.entity(target)?;
                    // Payload slots map to exactly one column
                    if target_def.key_columns.len() != 1 {
                        return Err(Error::InvalidSchema(format!(
                            "relation '{}': payload '{}' targets '{}' which has a composite key",
                            label, slot.name, target
                        )));
                    }
                }
            }
            if let Some(partner_name) = &rel.inverse {
                let partner = self.relation(&rel.related_entity, partner_name)?;
                if partner.related_entity != rel.owner_entity
                    || partner.join_table != rel.join_table
                    || partner.owner_columns != rel.related_columns
                    || partner.related_columns != rel.owner_columns
                {
                    return Err(Error::InvalidSchema(format!(
                        "relation '{}': inverse '{}' does not mirror it",
                        label, partner_name
                    )));
                }
                let payload_columns: Vec<&str> =
                    rel.payload.iter().map(|p| p.column.as_str()).collect();
                let partner_payload: Vec<&str> =
                    partner.payload.iter().map(|p| p.column.as_str()).collect();
                if payload_columns != partner_payload {
                    return Err(Error::InvalidSchema(format!(
                        "relation '{}': inverse '{}' has different payload columns",
                        label, partner_name
                    )));
                }
                if partner.inverse.as_deref() != Some(rel.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "relation '{}': inverse '{}' does not point back",
                        label, partner_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builder collecting declarations before validation.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
    relations: Vec<RelationDef>,
}

impl SchemaBuilder {
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    pub fn relation(mut self, def: RelationDef) -> Self {
        self.relations.push(def);
        self
    }

    /// Validate the collected declarations and produce a registry
    pub fn build(self) -> Result<SchemaRegistry> {
        let registry = SchemaRegistry {
            entities: self.entities,
            relations: self.relations,
        };
        registry.validate()?;
        Ok(registry)
    }
}
