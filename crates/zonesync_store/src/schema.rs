//! Entity catalog.

use std::collections::BTreeMap;

/// A named relationship from one entity type to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescription {
    /// Relationship name (also the remote reference key).
    pub name: String,
    /// Destination entity type.
    pub destination: String,
    /// True for to-many relationships.
    pub to_many: bool,
}

/// Description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescription {
    /// Entity type name (also the remote record type).
    pub name: String,
    /// Relationships declared on this entity.
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    /// Creates an entity description with no relationships.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relationships: Vec::new(),
        }
    }

    /// Declares a to-one relationship.
    #[must_use]
    pub fn with_to_one(mut self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            to_many: false,
        });
        self
    }

    /// Declares a to-many relationship.
    #[must_use]
    pub fn with_to_many(mut self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            to_many: true,
        });
        self
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Iterates the to-one relationships.
    pub fn to_one_relationships(&self) -> impl Iterator<Item = &RelationshipDescription> {
        self.relationships.iter().filter(|r| !r.to_many)
    }
}

/// The set of entity types known to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entities: BTreeMap<String, EntityDescription>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity description (builder style).
    #[must_use]
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Looks up an entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    /// Returns true if the entity is known.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Iterates entity names in sorted order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationships_by_kind() {
        let list = EntityDescription::new("List").with_to_many("tasks", "Task");
        let task = EntityDescription::new("Task")
            .with_to_one("list", "List")
            .with_to_one("assignee", "Person");

        assert_eq!(list.to_one_relationships().count(), 0);
        assert_eq!(task.to_one_relationships().count(), 2);
        assert_eq!(task.relationship("list").unwrap().destination, "List");
        assert!(task.relationship("tasks").is_none());
    }

    #[test]
    fn catalog_lookup() {
        let catalog = Catalog::new()
            .with_entity(EntityDescription::new("Task"))
            .with_entity(EntityDescription::new("List"));

        assert!(catalog.contains("Task"));
        assert!(!catalog.contains("Person"));
        assert_eq!(catalog.entity_names().collect::<Vec<_>>(), vec!["List", "Task"]);
    }
}
