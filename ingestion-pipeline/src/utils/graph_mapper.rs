use std::collections::HashMap;

use common::error::AppError;
use uuid::Uuid;

/// Maps the LLM's local entity keys (e.g. `"e1"`, `"the_suspect"`) onto the
/// stable database ids assigned to new `KnowledgeEntity` rows.
///
/// Relationships from the LLM may reference a key that was never declared in
/// `knowledge_entities` (the entity already exists in the graph). In that case
/// `get_or_parse_id` treats the key itself as the database id.
#[derive(Debug, Default)]
pub struct GraphMapper {
    assigned: HashMap<String, String>,
}

impl GraphMapper {
    pub fn new() -> Self {
        Self {
            assigned: HashMap::new(),
        }
    }

    /// Assigns a fresh database id for `key`, replacing any prior assignment.
    pub fn assign_id(&mut self, key: &str) {
        self.assigned
            .insert(key.to_string(), Uuid::new_v4().to_string());
    }

    /// Looks up the database id assigned to `key`. Errors if `key` was never assigned.
    pub fn get_id(&self, key: &str) -> Result<&str, AppError> {
        self.assigned
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| AppError::GraphMapper(format!("no id assigned for key '{key}'")))
    }

    /// Looks up the database id assigned to `key`, falling back to treating
    /// `key` itself as a pre-existing database id.
    pub fn get_or_parse_id(&self, key: &str) -> Result<&str, AppError> {
        Ok(self.assigned.get(key).map_or(key, String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_keys_resolve_to_generated_ids() {
        let mut mapper = GraphMapper::new();
        mapper.assign_id("e1");
        let id = mapper.get_id("e1").expect("id should resolve");
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn unassigned_key_is_treated_as_an_existing_database_id() {
        let mapper = GraphMapper::new();
        let resolved = mapper.get_or_parse_id("existing-entity-id").unwrap();
        assert_eq!(resolved, "existing-entity-id");
    }

    #[test]
    fn unassigned_key_errors_on_strict_lookup() {
        let mapper = GraphMapper::new();
        assert!(mapper.get_id("missing").is_err());
    }
}
