//! Namespace cache for symbolic space and index names.
//!
//! The server stamps every response with its schema id. The first
//! observed id seeds the cache; any later change invalidates every
//! cached name→id mapping in the same step that adopts the new id, so
//! stale mappings never survive a schema change.

use std::collections::HashMap;

/// Cached metadata for one space
#[derive(Debug, Clone, Default)]
pub struct SpaceMeta {
    /// Numeric space id
    pub id: u32,
    /// Space name
    pub name: String,
    /// Index name to numeric index id
    pub indexes: HashMap<String, u32>,
}

/// Name→id mappings plus the schema id they were resolved under
#[derive(Debug, Default)]
pub struct SchemaCache {
    schema_id: Option<u32>,
    by_name: HashMap<String, SpaceMeta>,
    by_id: HashMap<u32, SpaceMeta>,
}

impl SchemaCache {
    /// Record the schema id carried by a response. Returns true when the
    /// id changed and the cache was invalidated.
    pub fn observe(&mut self, schema_id: u32) -> bool {
        match self.schema_id {
            Some(current) if current != schema_id => {
                self.schema_id = Some(schema_id);
                self.by_name.clear();
                self.by_id.clear();
                true
            }
            Some(_) => false,
            None => {
                self.schema_id = Some(schema_id);
                false
            }
        }
    }

    /// Cache a resolved space, keyed by both name and numeric id.
    pub fn insert_space(&mut self, name: &str, id: u32) {
        let meta = SpaceMeta {
            id,
            name: name.to_string(),
            indexes: HashMap::new(),
        };
        self.by_name.insert(name.to_string(), meta.clone());
        self.by_id.insert(id, meta);
    }

    /// Cache a resolved index under its space.
    pub fn insert_index(&mut self, space_id: u32, name: &str, index_id: u32) {
        if let Some(meta) = self.by_id.get_mut(&space_id) {
            meta.indexes.insert(name.to_string(), index_id);
        }
        if let Some(meta) = self
            .by_id
            .get(&space_id)
            .map(|m| m.name.clone())
            .and_then(|n| self.by_name.get_mut(&n))
        {
            meta.indexes.insert(name.to_string(), index_id);
        }
    }

    /// Look up a space id by name.
    pub fn space_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).map(|m| m.id)
    }

    /// Look up an index id by space id and index name.
    pub fn index_id(&self, space_id: u32, name: &str) -> Option<u32> {
        self.by_id.get(&space_id)?.indexes.get(name).copied()
    }

    /// Schema id the cache was resolved under, if any response has been
    /// seen yet.
    pub fn schema_id(&self) -> Option<u32> {
        self.schema_id
    }
}
