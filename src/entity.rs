use std::sync::{Arc, Mutex, MutexGuard};

// fields are kept ordered so that entities print and persist deterministically
use std::collections::BTreeMap;

// used to print out readable forms of an entity
use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

// ------------- Collection -------------
/// A persistent collection that has not been materialized from the store yet.
/// It remembers whose relation it is so that a query can be scoped to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyCollection {
    pub owner_type: String,
    pub owner_id: Value,
    pub relation: String,
}

#[derive(Debug, Clone)]
pub enum Collection {
    /// Materialized or detached members held in memory.
    Loaded(Vec<EntityRef>),
    /// A proxy backed by the store.
    Lazy(LazyCollection),
}
impl Collection {
    pub fn empty() -> Self {
        Collection::Loaded(Vec::new())
    }
    pub fn is_persistent(&self) -> bool {
        matches!(self, Collection::Lazy(_))
    }
    pub fn members(&self) -> Option<&[EntityRef]> {
        match self {
            Collection::Loaded(members) => Some(members),
            Collection::Lazy(_) => None,
        }
    }
}

// ------------- FieldValue -------------
/// What a field access on an entity yields.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Attribute(Value),
    ToOne(Option<EntityRef>),
    ToMany(Collection),
}
impl FieldValue {
    pub fn as_attribute(&self) -> Option<&Value> {
        match self {
            FieldValue::Attribute(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_to_one(&self) -> Option<&Option<EntityRef>> {
        match self {
            FieldValue::ToOne(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            FieldValue::ToMany(c) => Some(c),
            _ => None,
        }
    }
}

// ------------- Entity -------------
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    id: Value,
    fields: BTreeMap<String, FieldValue>,
    // only the type and identity are known, as for the target of a to-one relation
    reference: bool,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: Value::Null,
            fields: BTreeMap::new(),
            reference: false,
        }
    }
    /// An unloaded stand-in for a row that is only known by its identity.
    pub fn reference(entity_type: impl Into<String>, id: Value) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            fields: BTreeMap::new(),
            reference: true,
        }
    }
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = id.into();
        self
    }
    pub fn with(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(attribute, value.into());
        self
    }
    pub fn with_to_one(mut self, relation: &str, target: &EntityRef) -> Self {
        self.set(relation, FieldValue::ToOne(Some(target.clone())));
        self
    }
    pub fn with_members(mut self, relation: &str, members: Vec<EntityRef>) -> Self {
        self.set(relation, FieldValue::ToMany(Collection::Loaded(members)));
        self
    }
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
    pub fn id(&self) -> &Value {
        &self.id
    }
    pub fn set_id(&mut self, id: Value) {
        self.id = id;
    }
    pub fn is_reference(&self) -> bool {
        self.reference
    }
    /// Current value of a field, following plain field access.
    pub fn value(&self, field: &str) -> Option<FieldValue> {
        self.fields.get(field).cloned()
    }
    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_owned(), value);
    }
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldValue::as_attribute)
    }
    pub fn set_attribute(&mut self, name: &str, value: Value) {
        self.set(name, FieldValue::Attribute(value));
    }
    pub fn to_one(&self, relation: &str) -> Option<EntityRef> {
        match self.fields.get(relation) {
            Some(FieldValue::ToOne(target)) => target.clone(),
            _ => None,
        }
    }
    pub fn collection(&self, relation: &str) -> Option<&Collection> {
        self.fields.get(relation).and_then(FieldValue::as_collection)
    }
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)?;
        if self.reference {
            return write!(f, " (reference)");
        }
        let mut s = String::new();
        for (name, value) in &self.fields {
            if let FieldValue::Attribute(v) = value {
                s += &format!("{name}: {v}, ");
            }
        }
        s.pop();
        s.pop();
        write!(f, " {{{}}}", s)
    }
}

// ------------- EntityRef -------------
/// A shared handle to an entity. Two handles denote the same entity object
/// when they point at the same allocation.
#[derive(Clone)]
pub struct EntityRef(Arc<Mutex<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(Mutex::new(entity)))
    }
    pub fn lock(&self) -> Result<MutexGuard<'_, Entity>> {
        self.0.lock().map_err(|e| Error::Lock(e.to_string()))
    }
    pub fn same(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
    /// Either the same object, or two copies of the same stored row.
    pub fn same_row(&self, other: &EntityRef) -> Result<bool> {
        if self.same(other) {
            return Ok(true);
        }
        let (entity_type, id) = {
            let entity = self.lock()?;
            (entity.entity_type().to_owned(), entity.id().clone())
        };
        let other = other.lock()?;
        Ok(!id.is_null() && entity_type == other.entity_type() && id == *other.id())
    }
    pub fn entity_type(&self) -> Result<String> {
        Ok(self.lock()?.entity_type().to_owned())
    }
    pub fn id(&self) -> Result<Value> {
        Ok(self.lock()?.id().clone())
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::new(entity)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // try_lock so that printing a handle from inside a locked section cannot deadlock
        match self.0.try_lock() {
            Ok(entity) => write!(f, "EntityRef({}#{})", entity.entity_type(), entity.id()),
            Err(_) => write!(f, "EntityRef(<locked>)"),
        }
    }
}
