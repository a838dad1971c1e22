//! Two-way mapping between numeric target ids and descriptive ids.
//!
//! Targets reported by the driver carry positive ids. Targets the engine
//! derives itself (e.g. "status 200 reached on GET:/items") are local and
//! get negative ids handed out here.

use std::collections::HashMap;

use evorest_core::TargetId;

#[derive(Debug, Clone, Default)]
pub struct IdMapper {
    by_id: HashMap<TargetId, String>,
    by_description: HashMap<String, TargetId>,
    next_local: i32,
}

impl IdMapper {
    pub fn new() -> Self {
        IdMapper {
            by_id: HashMap::new(),
            by_description: HashMap::new(),
            next_local: -1,
        }
    }

    /// Remembers the descriptive id of a driver target.
    pub fn add_mapping(&mut self, id: TargetId, description: &str) {
        self.by_id.insert(id, description.to_string());
        self.by_description.insert(description.to_string(), id);
    }

    /// Id of the local target `description`, created on first use.
    pub fn handle_local_target(&mut self, description: &str) -> TargetId {
        if let Some(id) = self.by_description.get(description) {
            return *id;
        }
        let id = TargetId(self.next_local);
        self.next_local -= 1;
        self.add_mapping(id, description);
        id
    }

    pub fn descriptive_id(&self, id: TargetId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, description: &str) -> Option<TargetId> {
        self.by_description.get(description).copied()
    }

    /// Local id of "status `status` reached on `action`".
    pub fn status_target(&mut self, status: i32, action: &str) -> TargetId {
        self.handle_local_target(&status_description(status, action))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Descriptive id of a status-code target, e.g. `201:POST:/items`.
pub fn status_description(status: i32, action: &str) -> String {
    format!("{}:{}", status, action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_targets_are_negative_and_stable() {
        let mut mapper = IdMapper::new();
        let a = mapper.status_target(200, "GET:/items");
        let b = mapper.status_target(404, "GET:/items");
        assert!(a.is_local() && b.is_local());
        assert_ne!(a, b);
        assert_eq!(mapper.status_target(200, "GET:/items"), a);
        assert_eq!(mapper.descriptive_id(a), Some("200:GET:/items"));
    }

    #[test]
    fn test_driver_mappings_both_ways() {
        let mut mapper = IdMapper::new();
        mapper.add_mapping(TargetId(12), "Line_at_Foo_00010");
        assert_eq!(mapper.id_of("Line_at_Foo_00010"), Some(TargetId(12)));
        assert_eq!(mapper.descriptive_id(TargetId(12)), Some("Line_at_Foo_00010"));
        assert_eq!(mapper.len(), 1);
    }
}
