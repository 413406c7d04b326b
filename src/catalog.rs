//! Catalog: schemas for node tables, rel tables, sequences and type
//! aliases
//!
//! The binder resolves names against the catalog; DDL operators mutate it
//! under the database's coarse lock. Entries are serializable so that the
//! catalog can be persisted alongside the data directory.

use crate::error::{QuiverError, QuiverResult};
use crate::types::{LogicalType, TableId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One property column of a node or rel table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: LogicalType,
    pub primary_key: bool,
}

/// Catalog entry for a node table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTableEntry {
    pub id: TableId,
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl NodeTableEntry {
    /// Index of the primary-key property
    pub fn primary_key_idx(&self) -> usize {
        self.properties
            .iter()
            .position(|p| p.primary_key)
            .unwrap_or(0)
    }

    pub fn property_idx(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// Catalog entry for a rel table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelTableEntry {
    pub id: TableId,
    pub name: String,
    pub src_table: TableId,
    pub dst_table: TableId,
    pub properties: Vec<PropertyDef>,
}

impl RelTableEntry {
    pub fn property_idx(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// Catalog entry for a sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub id: u64,
    pub name: String,
    pub current: i64,
}

/// Schema catalog for one database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    node_tables: HashMap<String, NodeTableEntry>,
    rel_tables: HashMap<String, RelTableEntry>,
    sequences: HashMap<String, SequenceEntry>,
    /// User-defined type aliases
    type_aliases: HashMap<String, LogicalType>,
    next_table_id: TableId,
    next_sequence_id: u64,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    fn assert_name_free(&self, name: &str) -> QuiverResult<()> {
        if self.node_tables.contains_key(name) || self.rel_tables.contains_key(name) {
            return Err(QuiverError::catalog(format!(
                "{name} already exists in catalog."
            )));
        }
        Ok(())
    }

    /// Register a node table; exactly one property must be the primary key
    pub fn create_node_table(
        &mut self,
        name: &str,
        properties: Vec<PropertyDef>,
    ) -> QuiverResult<TableId> {
        self.assert_name_free(name)?;
        let num_pk = properties.iter().filter(|p| p.primary_key).count();
        if num_pk != 1 {
            return Err(QuiverError::catalog(format!(
                "Node table {name} must define exactly one primary key, found {num_pk}."
            )));
        }
        let id = self.next_table_id;
        self.next_table_id += 1;
        self.node_tables.insert(
            name.to_string(),
            NodeTableEntry {
                id,
                name: name.to_string(),
                properties,
            },
        );
        Ok(id)
    }

    pub fn create_rel_table(
        &mut self,
        name: &str,
        src: &str,
        dst: &str,
        properties: Vec<PropertyDef>,
    ) -> QuiverResult<TableId> {
        self.assert_name_free(name)?;
        let src_table = self.node_table(src)?.id;
        let dst_table = self.node_table(dst)?.id;
        let id = self.next_table_id;
        self.next_table_id += 1;
        self.rel_tables.insert(
            name.to_string(),
            RelTableEntry {
                id,
                name: name.to_string(),
                src_table,
                dst_table,
                properties,
            },
        );
        Ok(id)
    }

    /// Drop a node or rel table by name. Dropping a node table referenced
    /// by a rel table fails.
    pub fn drop_table(&mut self, name: &str) -> QuiverResult<TableId> {
        if let Some(entry) = self.node_tables.get(name) {
            let id = entry.id;
            if let Some(rel) = self
                .rel_tables
                .values()
                .find(|r| r.src_table == id || r.dst_table == id)
            {
                return Err(QuiverError::catalog(format!(
                    "Cannot delete node table {name} because it is referenced by rel table {}.",
                    rel.name
                )));
            }
            self.node_tables.remove(name);
            return Ok(id);
        }
        if let Some(entry) = self.rel_tables.remove(name) {
            return Ok(entry.id);
        }
        Err(QuiverError::catalog(format!(
            "Table {name} does not exist."
        )))
    }

    pub fn rename_table(&mut self, old: &str, new: &str) -> QuiverResult<()> {
        self.assert_name_free(new)?;
        if let Some(mut entry) = self.node_tables.remove(old) {
            entry.name = new.to_string();
            self.node_tables.insert(new.to_string(), entry);
            return Ok(());
        }
        if let Some(mut entry) = self.rel_tables.remove(old) {
            entry.name = new.to_string();
            self.rel_tables.insert(new.to_string(), entry);
            return Ok(());
        }
        Err(QuiverError::catalog(format!("Table {old} does not exist.")))
    }

    pub fn add_property(&mut self, table: &str, name: &str, ty: LogicalType) -> QuiverResult<()> {
        let props = self.properties_mut(table)?;
        if props.iter().any(|p| p.name == name) {
            return Err(QuiverError::catalog(format!(
                "Property {name} already exists in table {table}."
            )));
        }
        props.push(PropertyDef {
            name: name.to_string(),
            ty,
            primary_key: false,
        });
        Ok(())
    }

    pub fn drop_property(&mut self, table: &str, name: &str) -> QuiverResult<()> {
        let props = self.properties_mut(table)?;
        let idx = props
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| {
                QuiverError::catalog(format!("Property {name} does not exist in table {table}."))
            })?;
        if props[idx].primary_key {
            return Err(QuiverError::catalog(format!(
                "Cannot drop primary key property {name}."
            )));
        }
        props.remove(idx);
        Ok(())
    }

    pub fn rename_property(&mut self, table: &str, old: &str, new: &str) -> QuiverResult<()> {
        let props = self.properties_mut(table)?;
        if props.iter().any(|p| p.name == new) {
            return Err(QuiverError::catalog(format!(
                "Property {new} already exists in table {table}."
            )));
        }
        let prop = props.iter_mut().find(|p| p.name == old).ok_or_else(|| {
            QuiverError::catalog(format!("Property {old} does not exist in table {table}."))
        })?;
        prop.name = new.to_string();
        Ok(())
    }

    fn properties_mut(&mut self, table: &str) -> QuiverResult<&mut Vec<PropertyDef>> {
        if let Some(entry) = self.node_tables.get_mut(table) {
            return Ok(&mut entry.properties);
        }
        if let Some(entry) = self.rel_tables.get_mut(table) {
            return Ok(&mut entry.properties);
        }
        Err(QuiverError::catalog(format!(
            "Table {table} does not exist."
        )))
    }

    pub fn create_sequence(&mut self, name: &str) -> QuiverResult<u64> {
        if self.sequences.contains_key(name) {
            return Err(QuiverError::catalog(format!(
                "Sequence {name} already exists."
            )));
        }
        let id = self.next_sequence_id;
        self.next_sequence_id += 1;
        self.sequences.insert(
            name.to_string(),
            SequenceEntry {
                id,
                name: name.to_string(),
                current: 0,
            },
        );
        Ok(id)
    }

    pub fn drop_sequence(&mut self, name: &str) -> QuiverResult<()> {
        self.sequences
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| QuiverError::catalog(format!("Sequence {name} does not exist.")))
    }

    /// Advance and return the next value of a sequence
    pub fn sequence_next_val(&mut self, name: &str) -> QuiverResult<i64> {
        let seq = self
            .sequences
            .get_mut(name)
            .ok_or_else(|| QuiverError::catalog(format!("Sequence {name} does not exist.")))?;
        seq.current += 1;
        Ok(seq.current)
    }

    pub fn create_type(&mut self, name: &str, ty: LogicalType) -> QuiverResult<()> {
        if self.type_aliases.contains_key(name) {
            return Err(QuiverError::catalog(format!(
                "Type {name} already exists."
            )));
        }
        self.type_aliases.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn drop_type(&mut self, name: &str) -> QuiverResult<()> {
        self.type_aliases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| QuiverError::catalog(format!("Type {name} does not exist.")))
    }

    pub fn resolve_type_alias(&self, name: &str) -> Option<&LogicalType> {
        self.type_aliases.get(name)
    }

    pub fn node_table(&self, name: &str) -> QuiverResult<&NodeTableEntry> {
        self.node_tables.get(name).ok_or_else(|| {
            QuiverError::catalog(format!("Node table {name} does not exist."))
        })
    }

    pub fn rel_table(&self, name: &str) -> QuiverResult<&RelTableEntry> {
        self.rel_tables.get(name).ok_or_else(|| {
            QuiverError::catalog(format!("Rel table {name} does not exist."))
        })
    }

    pub fn node_table_by_id(&self, id: TableId) -> QuiverResult<&NodeTableEntry> {
        self.node_tables
            .values()
            .find(|t| t.id == id)
            .ok_or_else(|| QuiverError::catalog(format!("Node table id {id} does not exist.")))
    }

    pub fn rel_table_by_id(&self, id: TableId) -> QuiverResult<&RelTableEntry> {
        self.rel_tables
            .values()
            .find(|t| t.id == id)
            .ok_or_else(|| QuiverError::catalog(format!("Rel table id {id} does not exist.")))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.node_tables.contains_key(name) || self.rel_tables.contains_key(name)
    }

    /// All node tables, sorted by name
    pub fn node_tables(&self) -> Vec<&NodeTableEntry> {
        let mut tables: Vec<_> = self.node_tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// All rel tables, sorted by name
    pub fn rel_tables(&self) -> Vec<&RelTableEntry> {
        let mut tables: Vec<_> = self.rel_tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_properties() -> Vec<PropertyDef> {
        vec![
            PropertyDef {
                name: "ID".to_string(),
                ty: LogicalType::Int64,
                primary_key: true,
            },
            PropertyDef {
                name: "fName".to_string(),
                ty: LogicalType::String,
                primary_key: false,
            },
        ]
    }

    #[test]
    fn test_create_and_lookup_node_table() {
        let mut catalog = Catalog::new();
        let id = catalog
            .create_node_table("person", person_properties())
            .expect("create");
        let entry = catalog.node_table("person").expect("lookup");
        assert_eq!(entry.id, id);
        assert_eq!(entry.primary_key_idx(), 0);
        assert_eq!(entry.property_idx("fName"), Some(1));
        assert!(catalog.node_table("nobody").is_err());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut catalog = Catalog::new();
        catalog
            .create_node_table("person", person_properties())
            .expect("create");
        let err = catalog
            .create_node_table("person", person_properties())
            .expect_err("duplicate");
        assert!(matches!(err, QuiverError::Catalog(_)));
    }

    #[test]
    fn test_rel_table_requires_endpoints() {
        let mut catalog = Catalog::new();
        assert!(catalog
            .create_rel_table("knows", "person", "person", vec![])
            .is_err());

        catalog
            .create_node_table("person", person_properties())
            .expect("create");
        let id = catalog
            .create_rel_table("knows", "person", "person", vec![])
            .expect("create rel");
        assert_eq!(catalog.rel_table("knows").expect("lookup").id, id);
    }

    #[test]
    fn test_drop_referenced_node_table_fails() {
        let mut catalog = Catalog::new();
        catalog
            .create_node_table("person", person_properties())
            .expect("create");
        catalog
            .create_rel_table("knows", "person", "person", vec![])
            .expect("create rel");
        assert!(catalog.drop_table("person").is_err());
        catalog.drop_table("knows").expect("drop rel");
        catalog.drop_table("person").expect("drop node");
    }

    #[test]
    fn test_property_mutations() {
        let mut catalog = Catalog::new();
        catalog
            .create_node_table("person", person_properties())
            .expect("create");
        catalog
            .add_property("person", "age", LogicalType::Int64)
            .expect("add");
        assert!(catalog.add_property("person", "age", LogicalType::Int64).is_err());
        catalog
            .rename_property("person", "age", "years")
            .expect("rename");
        catalog.drop_property("person", "years").expect("drop");
        assert!(catalog.drop_property("person", "ID").is_err(), "pk undropable");
    }

    #[test]
    fn test_sequences() {
        let mut catalog = Catalog::new();
        catalog.create_sequence("ids").expect("create");
        assert_eq!(catalog.sequence_next_val("ids").expect("next"), 1);
        assert_eq!(catalog.sequence_next_val("ids").expect("next"), 2);
        catalog.drop_sequence("ids").expect("drop");
        assert!(catalog.sequence_next_val("ids").is_err());
    }

    #[test]
    fn test_type_aliases() {
        let mut catalog = Catalog::new();
        catalog
            .create_type("BIGINT", LogicalType::Int64)
            .expect("create");
        assert_eq!(
            catalog.resolve_type_alias("BIGINT"),
            Some(&LogicalType::Int64)
        );
        catalog.drop_type("BIGINT").expect("drop");
        assert_eq!(catalog.resolve_type_alias("BIGINT"), None);
    }
}
