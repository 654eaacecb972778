//! Query construction.
//!
//! Every query goes through [`build_query`], driven by a [`QueryRequest`] that
//! says *what* to select ([`QueryTarget`]: a root entity collection or the
//! members of a relation) and *how* ([`QueryMode`]: the rows themselves or
//! their count). The result is a [`QueryPlan`]: SQL text with numbered
//! parameters that a [`crate::session::Session`] executes.
//!
//! Paths in filters and sort keys are resolved against the entity metadata
//! while the SQL is assembled. Each relation step becomes a `left join`, one
//! per distinct path prefix, and any to-many step makes the selection
//! `distinct` so that a row is returned once however many of its relatives
//! match.

use std::collections::HashMap;

use tracing::debug;

use crate::dictionary::{
    quote, AttributeBinding, EntityBinding, EntityDictionary, FieldKind, OtherHasher,
    RelationBinding, RelationKind,
};
use crate::entity::{Collection, LazyCollection};
use crate::error::{Error, Result};
use crate::filter::{FilterExpression, FilterPredicate, Operator};
use crate::pagination::Pagination;
use crate::path::{FieldType, Path};
use crate::relationship::Relationship;
use crate::sort::Sorting;
use crate::value::{Value, ValueType};

const ROOT: &str = "t0";
const LINK: &str = "s0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Fetch,
    Count,
}

#[derive(Debug, Clone, Copy)]
pub enum QueryTarget<'a> {
    Root(&'a str),
    Relation(&'a Relationship),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl From<&Pagination> for Window {
    fn from(p: &Pagination) -> Self {
        Window { offset: p.offset(), limit: p.limit() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    pub target: QueryTarget<'a>,
    pub mode: QueryMode,
    /// Absent: every row matches.
    pub filter: Option<&'a FilterExpression>,
    /// Absent: rows come back in whatever order the store yields them.
    pub sorting: Option<&'a Sorting>,
    /// Absent: unbounded. Ignored when counting.
    pub window: Option<Window>,
}

impl<'a> QueryRequest<'a> {
    pub fn root(entity_type: &'a str) -> Self {
        Self::targeting(QueryTarget::Root(entity_type))
    }
    pub fn relation(relationship: &'a Relationship) -> Self {
        Self::targeting(QueryTarget::Relation(relationship))
    }
    fn targeting(target: QueryTarget<'a>) -> Self {
        Self { target, mode: QueryMode::Fetch, filter: None, sorting: None, window: None }
    }
    pub fn count(mut self) -> Self {
        self.mode = QueryMode::Count;
        self
    }
    pub fn filter(mut self, filter: Option<&'a FilterExpression>) -> Self {
        self.filter = filter;
        self
    }
    pub fn sorting(mut self, sorting: Option<&'a Sorting>) -> Self {
        self.sorting = sorting;
        self
    }
    pub fn pagination(mut self, pagination: Option<&Pagination>) -> Self {
        self.window = pagination.map(Window::from);
        self
    }
    pub fn build(&self, dictionary: &dyn EntityDictionary) -> Result<Option<QueryPlan>> {
        build_query(dictionary, self)
    }
}

/// An executable query: SQL text and the values for its numbered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub entity_type: String,
    pub mode: QueryMode,
    pub sql: String,
    pub params: Vec<Value>,
}

/// One selected column of a fetch query, in selection order.
#[derive(Debug, Clone, Copy)]
pub enum Selected<'a> {
    Id,
    Attribute(&'a AttributeBinding),
    ForeignKey(&'a RelationBinding, &'a str),
}

/// The columns a fetch query selects for an entity type. Hydration reads
/// them back in the same order.
pub fn selection(binding: &EntityBinding) -> Vec<Selected<'_>> {
    let mut selected = vec![Selected::Id];
    selected.extend(binding.attributes.iter().map(Selected::Attribute));
    selected.extend(binding.foreign_keys().map(|(r, c)| Selected::ForeignKey(r, c)));
    selected
}

fn column_name<'a>(binding: &'a EntityBinding, selected: &Selected<'a>) -> &'a str {
    match *selected {
        Selected::Id => &binding.id_field,
        Selected::Attribute(a) => &a.name,
        Selected::ForeignKey(_, column) => column,
    }
}

/// A resolved field: the qualified column, its type, and whether reaching it
/// went through a to-many relation.
struct Resolved {
    column: String,
    value_type: ValueType,
    through_to_many: bool,
}

struct SqlBuilder<'d> {
    dictionary: &'d dyn EntityDictionary,
    root: &'d EntityBinding,
    joins: Vec<String>,
    aliases: HashMap<String, String, OtherHasher>,
    params: Vec<Value>,
    distinct: bool,
}

impl<'d> SqlBuilder<'d> {
    fn new(dictionary: &'d dyn EntityDictionary, root: &'d EntityBinding) -> Self {
        Self {
            dictionary,
            root,
            joins: Vec::new(),
            aliases: HashMap::default(),
            params: Vec::new(),
            distinct: false,
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    fn join(
        &mut self,
        parent_alias: &str,
        owner: &EntityBinding,
        relation: &RelationBinding,
        key: String,
    ) -> Result<String> {
        if let Some(alias) = self.aliases.get(&key) {
            return Ok(alias.clone());
        }
        let dictionary = self.dictionary;
        let target = dictionary.entity_binding(&relation.target)?;
        let alias = format!("t{}", self.aliases.len() + 1);
        let target_table = quote(target.table_name());
        match &relation.kind {
            RelationKind::ToOne { column } => {
                self.joins.push(format!(
                    "left join {target_table} {alias} on {alias}.{} = {parent_alias}.{}",
                    quote(&target.id_field),
                    quote(column)
                ));
            }
            RelationKind::ToMany { mapped_by } => {
                let foreign_key = inverse_column(target, mapped_by)?;
                self.joins.push(format!(
                    "left join {target_table} {alias} on {alias}.{} = {parent_alias}.{}",
                    quote(foreign_key),
                    quote(&owner.id_field)
                ));
                self.distinct = true;
            }
            RelationKind::ManyToMany { join_table, owner_column, inverse_column, .. } => {
                let link = format!("j{}", self.aliases.len() + 1);
                self.joins.push(format!(
                    "left join {} {link} on {link}.{} = {parent_alias}.{}",
                    quote(join_table),
                    quote(owner_column),
                    quote(&owner.id_field)
                ));
                self.joins.push(format!(
                    "left join {target_table} {alias} on {alias}.{} = {link}.{}",
                    quote(&target.id_field),
                    quote(inverse_column)
                ));
                self.distinct = true;
            }
        }
        self.aliases.insert(key, alias.clone());
        Ok(alias)
    }

    fn resolve(&mut self, path: &Path) -> Result<Resolved> {
        if path.root_type() != self.root.name {
            return Err(Error::construction(format!(
                "Path '{path}' does not start at entity '{}'",
                self.root.name
            )));
        }
        let dictionary = self.dictionary;
        let mut binding = self.root;
        let mut alias = ROOT.to_owned();
        let mut through_to_many = false;
        let (last, steps) = path
            .elements()
            .split_last()
            .ok_or_else(|| Error::construction("Empty path"))?;
        let mut key = String::new();
        for step in steps {
            if step.entity_type != binding.name {
                return Err(Error::construction(format!(
                    "Path '{path}' expects '{}' to be a field of '{}', not '{}'",
                    step.field_name, binding.name, step.entity_type
                )));
            }
            let relation = match binding.resolve(&step.field_name) {
                Some(FieldKind::Relation(r)) => r,
                Some(_) => {
                    return Err(Error::construction(format!(
                        "Field '{}.{}' in path '{path}' is not a relation",
                        binding.name, step.field_name
                    )));
                }
                None => return Err(unknown_field(binding, &step.field_name, path)),
            };
            if step.field_type != FieldType::Entity(relation.target.clone()) {
                return Err(Error::construction(format!(
                    "Relation '{}.{}' in path '{path}' leads to '{}'",
                    binding.name, step.field_name, relation.target
                )));
            }
            if !key.is_empty() {
                key.push('.');
            }
            key.push_str(&step.field_name);
            through_to_many |= relation.is_to_many();
            alias = self.join(&alias, binding, relation, key.clone())?;
            binding = dictionary.entity_binding(&relation.target)?;
        }
        if last.entity_type != binding.name {
            return Err(Error::construction(format!(
                "Path '{path}' expects '{}' to be a field of '{}', not '{}'",
                last.field_name, binding.name, last.entity_type
            )));
        }
        let value_type = match binding.resolve(&last.field_name) {
            Some(FieldKind::Id(t)) | Some(FieldKind::Attribute(t)) => t,
            Some(FieldKind::Relation(_)) => {
                return Err(Error::construction(format!(
                    "Path '{path}' ends at relation '{}.{}', not at an attribute",
                    binding.name, last.field_name
                )));
            }
            None => return Err(unknown_field(binding, &last.field_name, path)),
        };
        if last.field_type != FieldType::Value(value_type) {
            return Err(Error::construction(format!(
                "Type mismatch in path '{path}': '{}.{}' is {value_type}",
                binding.name, last.field_name
            )));
        }
        Ok(Resolved {
            column: format!("{alias}.{}", quote(&last.field_name)),
            value_type,
            through_to_many,
        })
    }

    fn translate(&mut self, expression: &FilterExpression) -> Result<String> {
        Ok(match expression {
            FilterExpression::Predicate(p) => self.predicate(p)?,
            FilterExpression::And(l, r) => format!("({} and {})", self.translate(l)?, self.translate(r)?),
            FilterExpression::Or(l, r) => format!("({} or {})", self.translate(l)?, self.translate(r)?),
            FilterExpression::Not(inner) => format!("not ({})", self.translate(inner)?),
        })
    }

    fn predicate(&mut self, predicate: &FilterPredicate) -> Result<String> {
        let operator = predicate.operator();
        let values = predicate.values();
        let path = predicate.path();
        if !operator.accepts(values.len()) {
            return Err(Error::construction(format!(
                "Operator '{}' on '{path}' does not take {} operand(s)",
                operator.name(),
                values.len()
            )));
        }
        let resolved = self.resolve(path)?;
        let column = resolved.column;
        for value in values {
            if value.is_null() {
                return Err(Error::construction(format!(
                    "Null operand for '{path}', use isnull or notnull instead"
                )));
            }
            if !value.fits(resolved.value_type) {
                return Err(Error::construction(format!(
                    "Type mismatch for '{path}': {} is not {}",
                    value, resolved.value_type
                )));
            }
        }
        if operator.is_textual() && resolved.value_type != ValueType::Text {
            return Err(Error::construction(format!(
                "Operator '{}' needs a text field, '{path}' is {}",
                operator.name(),
                resolved.value_type
            )));
        }
        let clause = match operator {
            Operator::True => "1 = 1".to_owned(),
            Operator::False => "1 = 0".to_owned(),
            Operator::IsNull => format!("{column} is null"),
            Operator::NotNull => format!("{column} is not null"),
            Operator::In | Operator::NotIn => {
                let negated = operator == Operator::NotIn;
                if values.is_empty() {
                    // nothing is a member of the empty set
                    if negated { "1 = 1".to_owned() } else { "1 = 0".to_owned() }
                } else {
                    let placeholders: Vec<String> = values.iter().map(|v| self.bind(v.clone())).collect();
                    let keyword = if negated { "not in" } else { "in" };
                    format!("{column} {keyword} ({})", placeholders.join(", "))
                }
            }
            Operator::Between => {
                let low = self.bind(values[0].clone());
                let high = self.bind(values[1].clone());
                format!("{column} between {low} and {high}")
            }
            Operator::Prefix => {
                let p = self.bind(values[0].clone());
                format!("substr({column}, 1, length({p})) = {p}")
            }
            Operator::Postfix => {
                let p = self.bind(values[0].clone());
                format!("substr({column}, length({column}) - length({p}) + 1) = {p}")
            }
            Operator::Infix => {
                let p = self.bind(values[0].clone());
                format!("instr({column}, {p}) > 0")
            }
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                let symbol = match operator {
                    Operator::Eq => "=",
                    Operator::Ne => "<>",
                    Operator::Lt => "<",
                    Operator::Le => "<=",
                    Operator::Gt => ">",
                    _ => ">=",
                };
                let p = self.bind(values[0].clone());
                format!("{column} {symbol} {p}")
            }
        };
        Ok(clause)
    }

    fn order_terms(&mut self, sorting: &Sorting) -> Result<Vec<String>> {
        let mut terms = Vec::new();
        let mut ordered_by_id = false;
        for (path, order) in sorting.keys() {
            let resolved = self.resolve(path)?;
            if resolved.through_to_many {
                return Err(Error::construction(format!(
                    "Cannot sort on '{path}' since it crosses a to-many relation"
                )));
            }
            if path.elements().len() == 1 && path.last().field_name == self.root.id_field {
                ordered_by_id = true;
            }
            terms.push(format!("{} {}", resolved.column, order.keyword()));
        }
        if !ordered_by_id {
            // ties keep a fixed order so that pages do not overlap
            terms.push(format!("{ROOT}.{} asc", quote(&self.root.id_field)));
        }
        Ok(terms)
    }

    /// Restricts the selection to the members of a lazily loaded relation.
    fn scope(&mut self, relationship: &Relationship, lazy: &LazyCollection) -> Result<String> {
        let dictionary = self.dictionary;
        let root = self.root;
        let parent = dictionary.entity_binding(&relationship.parent_type)?;
        let relation = parent.relation(&relationship.relation_name).ok_or_else(|| Error::InvalidAttribute {
            entity: parent.name.clone(),
            field: relationship.relation_name.clone(),
        })?;
        if relation.target != root.name {
            return Err(Error::construction(format!(
                "Relation '{}.{}' leads to '{}', not '{}'",
                parent.name, relation.name, relation.target, root.name
            )));
        }
        let mut owner_id = relationship.parent.id()?;
        if owner_id.is_null() {
            owner_id = lazy.owner_id.clone();
        }
        match &relation.kind {
            RelationKind::ToMany { mapped_by } => {
                let foreign_key = inverse_column(root, mapped_by)?;
                let p = self.bind(owner_id);
                Ok(format!("{ROOT}.{} = {p}", quote(foreign_key)))
            }
            RelationKind::ManyToMany { join_table, owner_column, inverse_column, .. } => {
                self.joins.insert(
                    0,
                    format!(
                        "join {} {LINK} on {LINK}.{} = {ROOT}.{}",
                        quote(join_table),
                        quote(inverse_column),
                        quote(&root.id_field)
                    ),
                );
                let p = self.bind(owner_id);
                Ok(format!("{LINK}.{} = {p}", quote(owner_column)))
            }
            RelationKind::ToOne { .. } => Err(Error::construction(format!(
                "Relation '{}.{}' is not a collection",
                parent.name, relation.name
            ))),
        }
    }
}

fn unknown_field(binding: &EntityBinding, field: &str, path: &Path) -> Error {
    Error::construction(format!("Unknown field '{}.{field}' in path '{path}'", binding.name))
}

/// The foreign key column of the to-one relation a to-many relation is mapped by.
fn inverse_column<'a>(child: &'a EntityBinding, mapped_by: &str) -> Result<&'a str> {
    match child.relation(mapped_by).map(|r| &r.kind) {
        Some(RelationKind::ToOne { column }) => Ok(column),
        _ => Err(Error::construction(format!(
            "'{}.{mapped_by}' is not a to-one relation",
            child.name
        ))),
    }
}

/// Builds the plan for a request. Returns `None` for a relation target whose
/// current value is not a lazy collection: such a value is already in memory
/// and should be used as it is.
pub fn build_query(dictionary: &dyn EntityDictionary, request: &QueryRequest) -> Result<Option<QueryPlan>> {
    let (root_type, scope) = match request.target {
        QueryTarget::Root(entity_type) => (entity_type, None),
        QueryTarget::Relation(relationship) => match &relationship.current {
            Collection::Lazy(lazy) => (relationship.child_type.as_str(), Some((relationship, lazy))),
            Collection::Loaded(_) => return Ok(None),
        },
    };
    let root = dictionary.entity_binding(root_type)?;
    let mut builder = SqlBuilder::new(dictionary, root);

    let mut conditions = Vec::new();
    if let Some((relationship, lazy)) = scope {
        conditions.push(builder.scope(relationship, lazy)?);
    }
    if let Some(filter) = request.filter {
        conditions.push(builder.translate(filter)?);
    }
    let order = match (request.mode, request.sorting) {
        (QueryMode::Fetch, Some(sorting)) => builder.order_terms(sorting)?,
        _ => Vec::new(),
    };

    let id_column = format!("{ROOT}.{}", quote(&root.id_field));
    let projection = match request.mode {
        QueryMode::Count => format!("count(distinct {id_column})"),
        QueryMode::Fetch => {
            let columns: Vec<String> = selection(root)
                .iter()
                .map(|s| format!("{ROOT}.{}", quote(column_name(root, s))))
                .collect();
            let distinct = if builder.distinct { "distinct " } else { "" };
            format!("{distinct}{}", columns.join(", "))
        }
    };
    let mut sql = format!("select {projection} from {} {ROOT}", quote(root.table_name()));
    for join in &builder.joins {
        sql += " ";
        sql += join;
    }
    if !conditions.is_empty() {
        sql += " where ";
        sql += &conditions.join(" and ");
    }
    if !order.is_empty() {
        sql += " order by ";
        sql += &order.join(", ");
    }
    if let (QueryMode::Fetch, Some(window)) = (request.mode, request.window) {
        let limit = builder.bind(Value::Integer(to_i64(window.limit)?));
        let offset = builder.bind(Value::Integer(to_i64(window.offset)?));
        sql += &format!(" limit {limit} offset {offset}");
    }

    debug!(entity = %root.name, mode = ?request.mode, %sql, params = builder.params.len(), "built query");
    Ok(Some(QueryPlan {
        entity_type: root.name.clone(),
        mode: request.mode,
        sql,
        params: builder.params,
    }))
}

fn to_i64(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::Pagination(format!("{n} is out of range")))
}

/// Checks that every sort key resolves and none crosses a to-many relation.
pub fn check_sorting(dictionary: &dyn EntityDictionary, entity_type: &str, sorting: &Sorting) -> Result<()> {
    let root = dictionary.entity_binding(entity_type)?;
    SqlBuilder::new(dictionary, root).order_terms(sorting).map(|_| ())
}

/// Checks that every path in a filter resolves and every operand fits.
pub fn check_filter(dictionary: &dyn EntityDictionary, entity_type: &str, filter: &FilterExpression) -> Result<()> {
    let root = dictionary.entity_binding(entity_type)?;
    SqlBuilder::new(dictionary, root).translate(filter).map(|_| ())
}
