use std::fmt;

use crate::dictionary::{EntityDictionary, FieldKind};
use crate::error::{Error, Result};
use crate::value::ValueType;

/// What a path step lands on: a scalar column or another entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Value(ValueType),
    Entity(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathElement {
    pub entity_type: String,
    pub field_type: FieldType,
    pub field_name: String,
}
impl PathElement {
    pub fn new(entity_type: &str, field_type: FieldType, field_name: &str) -> Self {
        Self {
            entity_type: entity_type.to_owned(),
            field_type,
            field_name: field_name.to_owned(),
        }
    }
}

/// Navigation from a root entity type to a (possibly nested) field.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    elements: Vec<PathElement>,
}

impl Path {
    pub fn new(elements: Vec<PathElement>) -> Result<Self> {
        if elements.is_empty() {
            return Err(Error::construction("A path needs at least one element"));
        }
        Ok(Self { elements })
    }
    pub fn from_element(element: PathElement) -> Self {
        Self { elements: vec![element] }
    }
    /// Resolves a dotted field path such as `author.name` starting at `root`.
    pub fn parse(dictionary: &dyn EntityDictionary, root: &str, dotted: &str) -> Result<Self> {
        let mut elements = Vec::new();
        let mut current = root.to_owned();
        let mut steps = dotted.split('.').peekable();
        while let Some(step) = steps.next() {
            let binding = dictionary.entity_binding(&current)?;
            let field_type = match binding.resolve(step) {
                Some(FieldKind::Id(t)) | Some(FieldKind::Attribute(t)) => FieldType::Value(t),
                Some(FieldKind::Relation(r)) => FieldType::Entity(r.target.clone()),
                None => {
                    return Err(Error::construction(format!(
                        "Unknown field '{step}' on entity '{current}' in path '{dotted}'"
                    )));
                }
            };
            let next = match (&field_type, steps.peek()) {
                (FieldType::Entity(target), Some(_)) => Some(target.clone()),
                (FieldType::Value(_), Some(_)) => {
                    return Err(Error::construction(format!(
                        "Field '{step}' on entity '{current}' is not a relation and cannot be navigated in path '{dotted}'"
                    )));
                }
                (_, None) => None,
            };
            elements.push(PathElement::new(&current, field_type, step));
            if let Some(next) = next {
                current = next;
            }
        }
        Self::new(elements)
    }
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }
    pub fn root_type(&self) -> &str {
        &self.elements[0].entity_type
    }
    pub fn last(&self) -> &PathElement {
        &self.elements[self.elements.len() - 1]
    }
    /// The field names joined with dots, without the root type.
    pub fn field_path(&self) -> String {
        self.elements
            .iter()
            .map(|e| e.field_name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.root_type(), self.field_path())
    }
}
