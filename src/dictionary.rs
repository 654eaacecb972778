//! Entity metadata: which entity types exist, how they map onto tables and
//! columns, and how their relations are joined.
//!
//! The query builder and the SQLite session only ever consult metadata through
//! the [`EntityDictionary`] trait. [`Dictionary`] is the in-memory registry the
//! crate ships with; it can be assembled with the [`EntityBinding`] builder
//! methods or loaded from a JSON model file.

// other maps use a fast hash since keys are short entity and field names
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::ValueType;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// A dictionary shared between the sessions and transactions that consult it.
pub type SharedDictionary = Arc<dyn EntityDictionary + Send + Sync>;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Names end up inside SQL text, so only plain identifiers are accepted.
pub fn check_identifier(name: &str, what: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::Model(format!("'{name}' is not a valid {what} name")))
    }
}

pub fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

// ------------- Bindings -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeBinding {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// A foreign key column on the owner's table.
    ToOne { column: String },
    /// The inverse of a to-one relation declared on the target.
    ToMany { mapped_by: String },
    /// Rows linked through a join table. Only the owning side writes the join table.
    ManyToMany {
        join_table: String,
        owner_column: String,
        inverse_column: String,
        #[serde(default)]
        owning: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationBinding {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub kind: RelationKind,
}
impl RelationBinding {
    pub fn is_to_many(&self) -> bool {
        !matches!(self.kind, RelationKind::ToOne { .. })
    }
}

/// How a name resolves on an entity type.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind<'a> {
    Id(ValueType),
    Attribute(ValueType),
    Relation(&'a RelationBinding),
}

fn default_id_field() -> String {
    "id".to_owned()
}
fn default_id_type() -> ValueType {
    ValueType::Integer
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBinding {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_id_type")]
    pub id_type: ValueType,
    #[serde(default)]
    pub attributes: Vec<AttributeBinding>,
    #[serde(default)]
    pub relations: Vec<RelationBinding>,
}

impl EntityBinding {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            table: None,
            id_field: default_id_field(),
            id_type: default_id_type(),
            attributes: Vec::new(),
            relations: Vec::new(),
        }
    }
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_owned());
        self
    }
    pub fn id(mut self, field: &str, id_type: ValueType) -> Self {
        self.id_field = field.to_owned();
        self.id_type = id_type;
        self
    }
    pub fn attribute(mut self, name: &str, value_type: ValueType) -> Self {
        self.attributes.push(AttributeBinding { name: name.to_owned(), value_type });
        self
    }
    pub fn to_one(mut self, name: &str, target: &str, column: &str) -> Self {
        self.relations.push(RelationBinding {
            name: name.to_owned(),
            target: target.to_owned(),
            kind: RelationKind::ToOne { column: column.to_owned() },
        });
        self
    }
    pub fn to_many(mut self, name: &str, target: &str, mapped_by: &str) -> Self {
        self.relations.push(RelationBinding {
            name: name.to_owned(),
            target: target.to_owned(),
            kind: RelationKind::ToMany { mapped_by: mapped_by.to_owned() },
        });
        self
    }
    pub fn many_to_many(
        mut self,
        name: &str,
        target: &str,
        join_table: &str,
        owner_column: &str,
        inverse_column: &str,
        owning: bool,
    ) -> Self {
        self.relations.push(RelationBinding {
            name: name.to_owned(),
            target: target.to_owned(),
            kind: RelationKind::ManyToMany {
                join_table: join_table.to_owned(),
                owner_column: owner_column.to_owned(),
                inverse_column: inverse_column.to_owned(),
                owning,
            },
        });
        self
    }
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
    pub fn attribute_binding(&self, name: &str) -> Option<&AttributeBinding> {
        self.attributes.iter().find(|a| a.name == name)
    }
    pub fn relation(&self, name: &str) -> Option<&RelationBinding> {
        self.relations.iter().find(|r| r.name == name)
    }
    pub fn resolve(&self, name: &str) -> Option<FieldKind<'_>> {
        if name == self.id_field {
            return Some(FieldKind::Id(self.id_type));
        }
        if let Some(attribute) = self.attribute_binding(name) {
            return Some(FieldKind::Attribute(attribute.value_type));
        }
        self.relation(name).map(FieldKind::Relation)
    }
    /// Relations stored as a foreign key column on this entity's table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&RelationBinding, &str)> {
        self.relations.iter().filter_map(|r| match &r.kind {
            RelationKind::ToOne { column } => Some((r, column.as_str())),
            _ => None,
        })
    }
}

// ------------- EntityDictionary -------------
pub trait EntityDictionary {
    fn entity_binding(&self, entity_type: &str) -> Result<&EntityBinding>;
    fn entity_types(&self) -> Vec<&str>;

    fn id_field_name(&self, entity_type: &str) -> Result<&str> {
        Ok(&self.entity_binding(entity_type)?.id_field)
    }
    fn id_type(&self, entity_type: &str) -> Result<ValueType> {
        Ok(self.entity_binding(entity_type)?.id_type)
    }
    /// The element type of a relation.
    fn parameterized_type(&self, entity_type: &str, relation: &str) -> Result<&str> {
        self.entity_binding(entity_type)?
            .relation(relation)
            .map(|r| r.target.as_str())
            .ok_or_else(|| Error::InvalidAttribute {
                entity: entity_type.to_owned(),
                field: relation.to_owned(),
            })
    }
    fn lookup_entity_type(&self, entity: &Entity) -> Result<&str> {
        Ok(&self.entity_binding(entity.entity_type())?.name)
    }
}

/// The serialized form of a dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub entities: Vec<EntityBinding>,
}

#[derive(Debug, Default)]
pub struct Dictionary {
    bindings: HashMap<String, EntityBinding, OtherHasher>,
    // declaration order, used when the schema is created
    order: Vec<String>,
}

impl Dictionary {
    pub fn new(entities: Vec<EntityBinding>) -> Result<Self> {
        let mut dictionary = Dictionary::default();
        for binding in entities {
            if dictionary.bindings.contains_key(&binding.name) {
                return Err(Error::Model(format!("Entity '{}' is declared twice", binding.name)));
            }
            dictionary.order.push(binding.name.clone());
            dictionary.bindings.insert(binding.name.clone(), binding);
        }
        dictionary.validate()?;
        Ok(dictionary)
    }
    pub fn from_model(model: Model) -> Result<Self> {
        Self::new(model.entities)
    }
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_model(serde_json::from_str(json)?)
    }
    pub fn to_model(&self) -> Model {
        Model {
            entities: self
                .order
                .iter()
                .filter_map(|name| self.bindings.get(name).cloned())
                .collect(),
        }
    }
    pub fn len(&self) -> usize {
        self.bindings.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
    fn validate(&self) -> Result<()> {
        for binding in self.order.iter().filter_map(|n| self.bindings.get(n)) {
            let entity = &binding.name;
            check_identifier(entity, "entity")?;
            check_identifier(binding.table_name(), "table")?;
            check_identifier(&binding.id_field, "field")?;
            if !matches!(binding.id_type, ValueType::Integer | ValueType::Text) {
                return Err(Error::Model(format!(
                    "Entity '{entity}' has an identifier of type {}, only Integer and Text are supported",
                    binding.id_type
                )));
            }
            let mut seen = vec![binding.id_field.as_str()];
            let names = binding
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .chain(binding.relations.iter().map(|r| r.name.as_str()));
            for name in names {
                check_identifier(name, "field")?;
                if seen.contains(&name) {
                    return Err(Error::Model(format!("Field '{name}' is declared twice on '{entity}'")));
                }
                seen.push(name);
            }
            let mut stored = vec![binding.id_field.as_str()];
            stored.extend(binding.attributes.iter().map(|a| a.name.as_str()));
            for (relation, column) in binding.foreign_keys() {
                if stored.contains(&column) {
                    return Err(Error::Model(format!(
                        "Relation '{entity}.{}' uses column '{column}' which is already a column of '{entity}'",
                        relation.name
                    )));
                }
                stored.push(column);
            }
            for relation in &binding.relations {
                let target = self.bindings.get(&relation.target).ok_or_else(|| {
                    Error::Model(format!(
                        "Relation '{entity}.{}' targets unknown entity '{}'",
                        relation.name, relation.target
                    ))
                })?;
                match &relation.kind {
                    RelationKind::ToOne { column } => check_identifier(column, "column")?,
                    RelationKind::ToMany { mapped_by } => match target.relation(mapped_by) {
                        Some(inverse)
                            if inverse.target == *entity
                                && matches!(inverse.kind, RelationKind::ToOne { .. }) => {}
                        _ => {
                            return Err(Error::Model(format!(
                                "Relation '{entity}.{}' is mapped by '{}.{mapped_by}' which is not a to-one relation back to '{entity}'",
                                relation.name, relation.target
                            )));
                        }
                    },
                    RelationKind::ManyToMany { join_table, owner_column, inverse_column, .. } => {
                        check_identifier(join_table, "table")?;
                        check_identifier(owner_column, "column")?;
                        check_identifier(inverse_column, "column")?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl EntityDictionary for Dictionary {
    fn entity_binding(&self, entity_type: &str) -> Result<&EntityBinding> {
        self.bindings
            .get(entity_type)
            .ok_or_else(|| Error::QueryConstruction(format!("Unknown entity type '{entity_type}'")))
    }
    fn entity_types(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}
