//! The data-store transaction: reads go straight to the session through the
//! query builder, writes wait in a [`TransactionBuffer`] until the transaction
//! is flushed or committed.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{PendingOperation, TransactionBuffer, TransactionState};
use crate::dictionary::{EntityDictionary, FieldKind, RelationKind, SharedDictionary};
use crate::entity::{Collection, Entity, EntityRef, FieldValue};
use crate::error::{Error, Result};
use crate::filter::{FilterExpression, Operator};
use crate::pagination::Pagination;
use crate::path::{FieldType, Path, PathElement};
use crate::query::{check_filter, check_sorting, QueryPlan, QueryRequest};
use crate::relationship::Relationship;
use crate::results::{Query, ResultSet};
use crate::session::Session;
use crate::sort::Sorting;
use crate::value::Value;

/// Whether a store-side feature can be used for a given request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSupport {
    Full,
    None,
}

/// An opaque principal handed through to whoever asks for it.
#[derive(Clone)]
pub struct User(Arc<dyn Any + Send + Sync>);

impl User {
    pub fn new<T: Any + Send + Sync>(principal: T) -> Self {
        Self(Arc::new(principal))
    }
    pub fn principal<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "User(..)")
    }
}

pub struct Transaction<'s, S: Session + ?Sized> {
    session: &'s mut S,
    dictionary: SharedDictionary,
    buffer: TransactionBuffer,
}

fn planned(plan: Option<QueryPlan>) -> Result<QueryPlan> {
    plan.ok_or_else(|| Error::InvalidState("No query is needed for a value held in memory".to_owned()))
}

impl<'s, S: Session + ?Sized> Transaction<'s, S> {
    pub fn new(session: &'s mut S, dictionary: SharedDictionary) -> Self {
        debug!("transaction opened");
        Self { session, dictionary, buffer: TransactionBuffer::new() }
    }
    pub fn state(&self) -> TransactionState {
        self.buffer.state()
    }
    pub fn pending(&self) -> &[PendingOperation] {
        self.buffer.pending()
    }
    pub fn dictionary(&self) -> &dyn EntityDictionary {
        self.dictionary.as_ref()
    }

    // ------------- Reads -------------
    /// The entity with the given id that also satisfies the filter, if any.
    /// A missing id matches nothing.
    pub fn load_object(
        &mut self,
        entity_type: &str,
        id: Option<Value>,
        filter: Option<&FilterExpression>,
    ) -> Result<Option<EntityRef>> {
        let dictionary = Arc::clone(&self.dictionary);
        let element = PathElement::new(
            entity_type,
            FieldType::Value(dictionary.id_type(entity_type)?),
            dictionary.id_field_name(entity_type)?,
        );
        let id_filter = match id {
            Some(id) if !id.is_null() => {
                FilterExpression::predicate(Path::from_element(element), Operator::In, vec![id])
            }
            _ => FilterExpression::predicate(Path::from_element(element), Operator::False, Vec::new()),
        };
        let filter = FilterExpression::and_maybe(filter, id_filter);
        let plan = planned(QueryRequest::root(entity_type).filter(Some(&filter)).build(dictionary.as_ref())?)?;
        match Query::new(&mut *self.session, plan).single_result() {
            Ok(entity) => Ok(Some(entity)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every entity of a type that satisfies the filter. When the pagination
    /// asks for totals, the unwindowed match count is stored in it first.
    pub fn load_objects(
        &mut self,
        entity_type: &str,
        filter: Option<&FilterExpression>,
        sorting: Option<&Sorting>,
        pagination: Option<&mut Pagination>,
    ) -> Result<ResultSet> {
        let request = QueryRequest::root(entity_type).filter(filter).sorting(sorting);
        self.run(request, pagination)
    }

    /// The value of a relation. A lazy collection is queried when a filter,
    /// sorting or pagination is given; any other value, or a lazy collection
    /// asked for without them, is returned as it is.
    pub fn get_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        filter: Option<&FilterExpression>,
        sorting: Option<&Sorting>,
        pagination: Option<&mut Pagination>,
    ) -> Result<FieldValue> {
        let dictionary = Arc::clone(&self.dictionary);
        let (parent_type, current) = {
            let guard = entity.lock()?;
            (guard.entity_type().to_owned(), guard.value(relation))
        };
        let binding = dictionary.entity_binding(&parent_type)?;
        let current = match (current, binding.resolve(relation)) {
            (_, None) => {
                return Err(Error::InvalidAttribute { entity: parent_type, field: relation.to_owned() });
            }
            (Some(value), _) => value,
            (None, Some(FieldKind::Id(_))) => FieldValue::Attribute(entity.id()?),
            (None, Some(FieldKind::Attribute(_))) => FieldValue::Attribute(Value::Null),
            (None, Some(FieldKind::Relation(r))) if r.is_to_many() => FieldValue::ToMany(Collection::empty()),
            (None, Some(FieldKind::Relation(_))) => FieldValue::ToOne(None),
        };
        let requested = filter.is_some() || sorting.is_some() || pagination.is_some();
        match current {
            FieldValue::ToMany(collection @ Collection::Lazy(_)) if requested => {
                let members = self.members(entity, &parent_type, relation, collection, filter, sorting, pagination)?;
                Ok(FieldValue::ToMany(Collection::Loaded(members)))
            }
            other => Ok(other),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn members(
        &mut self,
        entity: &EntityRef,
        parent_type: &str,
        relation: &str,
        current: Collection,
        filter: Option<&FilterExpression>,
        sorting: Option<&Sorting>,
        pagination: Option<&mut Pagination>,
    ) -> Result<Vec<EntityRef>> {
        let dictionary = Arc::clone(&self.dictionary);
        let child_type = dictionary.parameterized_type(parent_type, relation)?;
        let relationship = Relationship::new(parent_type, child_type, relation, entity.clone(), current);
        let request = QueryRequest::relation(&relationship).filter(filter).sorting(sorting);
        Ok(self.run(request, pagination)?.collect())
    }

    fn run(&mut self, request: QueryRequest<'_>, mut pagination: Option<&mut Pagination>) -> Result<ResultSet> {
        let dictionary = Arc::clone(&self.dictionary);
        if let Some(page) = pagination.as_deref_mut() {
            if page.generate_totals() {
                let plan = planned(request.count().build(dictionary.as_ref())?)?;
                let totals = Query::new(&mut *self.session, plan).count()?;
                page.set_page_totals(totals);
            }
        }
        let plan = planned(request.pagination(pagination.as_deref()).build(dictionary.as_ref())?)?;
        Query::new(&mut *self.session, plan).results()
    }

    // ------------- Writes -------------
    pub fn create_object(&mut self, entity: &EntityRef) -> Result<()> {
        self.known(entity)?;
        self.buffer.enqueue(PendingOperation::Create(entity.clone()))
    }
    pub fn save(&mut self, entity: &EntityRef) -> Result<()> {
        self.known(entity)?;
        self.buffer.enqueue(PendingOperation::Save(entity.clone()))
    }
    pub fn delete(&mut self, entity: &EntityRef) -> Result<()> {
        self.known(entity)?;
        self.buffer.enqueue(PendingOperation::Delete(entity.clone()))
    }
    fn known(&self, entity: &EntityRef) -> Result<()> {
        let guard = entity.lock()?;
        self.dictionary.lookup_entity_type(&guard).map(|_| ())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.buffer.flush(&mut *self.session)
    }
    pub fn commit(&mut self) -> Result<()> {
        let operations = self.buffer.len();
        self.flush()?;
        info!(operations, "transaction committed");
        Ok(())
    }
    /// Drops pending operations; work that was flushed stays with the session.
    pub fn rollback(&mut self) {
        self.buffer.rollback();
    }
    pub fn close(&mut self) -> Result<()> {
        self.buffer.close()
    }

    pub fn access_user<T: Any + Send + Sync>(&self, principal: T) -> User {
        User::new(principal)
    }

    // ------------- Entity construction & field access -------------
    /// A detached entity with every declared field present and empty.
    pub fn create_new_object(&self, entity_type: &str) -> Result<EntityRef> {
        let binding = self.dictionary.entity_binding(entity_type)?;
        let mut entity = Entity::new(binding.name.as_str());
        for attribute in &binding.attributes {
            entity.set_attribute(&attribute.name, Value::Null);
        }
        for relation in &binding.relations {
            let empty = if relation.is_to_many() {
                FieldValue::ToMany(Collection::empty())
            } else {
                FieldValue::ToOne(None)
            };
            entity.set(&relation.name, empty);
        }
        Ok(EntityRef::new(entity))
    }

    pub fn get_attribute(&self, entity: &EntityRef, attribute: &str) -> Result<Value> {
        let guard = entity.lock()?;
        let binding = self.dictionary.entity_binding(guard.entity_type())?;
        match binding.resolve(attribute) {
            Some(FieldKind::Id(_)) => Ok(guard.id().clone()),
            Some(FieldKind::Attribute(_)) => Ok(guard.attribute(attribute).cloned().unwrap_or(Value::Null)),
            _ => Err(Error::InvalidAttribute { entity: binding.name.clone(), field: attribute.to_owned() }),
        }
    }

    pub fn set_attribute(&self, entity: &EntityRef, attribute: &str, value: Value) -> Result<()> {
        let mut guard = entity.lock()?;
        let binding = self.dictionary.entity_binding(guard.entity_type())?;
        let value_type = match binding.resolve(attribute) {
            Some(FieldKind::Id(t)) | Some(FieldKind::Attribute(t)) => t,
            _ => {
                return Err(Error::InvalidAttribute { entity: binding.name.clone(), field: attribute.to_owned() });
            }
        };
        if !value.fits(value_type) {
            return Err(Error::construction(format!(
                "Cannot set '{}.{attribute}' of type {value_type} to {value}",
                binding.name
            )));
        }
        if attribute == binding.id_field {
            guard.set_id(value);
        } else {
            guard.set_attribute(attribute, value);
        }
        Ok(())
    }

    pub fn update_to_one_relation(&self, entity: &EntityRef, relation: &str, target: Option<&EntityRef>) -> Result<()> {
        let entity_type = entity.entity_type()?;
        let binding = self.dictionary.entity_binding(&entity_type)?;
        let declared = match binding.relation(relation) {
            Some(r) if matches!(r.kind, RelationKind::ToOne { .. }) => r,
            _ => return Err(Error::InvalidAttribute { entity: entity_type, field: relation.to_owned() }),
        };
        if let Some(target) = target {
            let target_type = target.entity_type()?;
            if target_type != declared.target {
                return Err(Error::construction(format!(
                    "'{entity_type}.{relation}' holds a '{}', not a '{target_type}'",
                    declared.target
                )));
            }
        }
        entity.lock()?.set(relation, FieldValue::ToOne(target.cloned()));
        Ok(())
    }

    /// Adds and removes members of a to-many relation in memory. A lazy
    /// collection is loaded first so that the result holds every member.
    pub fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> Result<()> {
        let entity_type = entity.entity_type()?;
        let target_type = {
            let binding = self.dictionary.entity_binding(&entity_type)?;
            match binding.relation(relation) {
                Some(r) if r.is_to_many() => r.target.clone(),
                _ => return Err(Error::InvalidAttribute { entity: entity_type, field: relation.to_owned() }),
            }
        };
        for member in added {
            let member_type = member.entity_type()?;
            if member_type != target_type {
                return Err(Error::construction(format!(
                    "'{entity_type}.{relation}' holds '{target_type}' members, not '{member_type}'"
                )));
            }
        }
        let mut members = match self.get_relation(entity, relation, None, None, None)? {
            FieldValue::ToMany(Collection::Loaded(members)) => members,
            FieldValue::ToMany(lazy @ Collection::Lazy(_)) => {
                self.members(entity, &entity_type, relation, lazy, None, None, None)?
            }
            _ => Vec::new(),
        };
        let mut kept = Vec::with_capacity(members.len() + added.len());
        for member in members.drain(..) {
            if !contains(removed, &member)? {
                kept.push(member);
            }
        }
        for member in added {
            if !contains(&kept, member)? {
                kept.push(member.clone());
            }
        }
        let members = kept;
        entity.lock()?.set(relation, FieldValue::ToMany(Collection::Loaded(members)));
        Ok(())
    }

    // ------------- Feature support -------------
    pub fn supports_filtering(&self, entity_type: &str, filter: &FilterExpression) -> FeatureSupport {
        supported(check_filter(self.dictionary.as_ref(), entity_type, filter))
    }
    pub fn supports_sorting(&self, entity_type: &str, sorting: &Sorting) -> FeatureSupport {
        supported(check_sorting(self.dictionary.as_ref(), entity_type, sorting))
    }
    pub fn supports_pagination(&self, entity_type: &str) -> FeatureSupport {
        supported(self.dictionary.entity_binding(entity_type).map(|_| ()))
    }
}

fn contains(members: &[EntityRef], entity: &EntityRef) -> Result<bool> {
    for member in members {
        if member.same_row(entity)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn supported(check: Result<()>) -> FeatureSupport {
    match check {
        Ok(()) => FeatureSupport::Full,
        Err(e) => {
            debug!(error = %e, "feature not supported");
            FeatureSupport::None
        }
    }
}
