use crate::entity::{Collection, EntityRef};

/// A parent entity, one of its named relations, and what is currently loaded for it.
/// Built for a single traversal and dropped afterwards.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub parent_type: String,
    pub child_type: String,
    pub relation_name: String,
    pub parent: EntityRef,
    pub current: Collection,
}

impl Relationship {
    pub fn new(
        parent_type: &str,
        child_type: &str,
        relation_name: &str,
        parent: EntityRef,
        current: Collection,
    ) -> Self {
        Self {
            parent_type: parent_type.to_owned(),
            child_type: child_type.to_owned(),
            relation_name: relation_name.to_owned(),
            parent,
            current,
        }
    }
}
