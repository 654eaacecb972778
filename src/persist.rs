// used for persistence
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dictionary::{quote, EntityBinding, EntityDictionary, RelationBinding, RelationKind, SharedDictionary};
use crate::entity::{Collection, Entity, EntityRef, FieldValue, LazyCollection};
use crate::error::{Error, Result};
use crate::query::{selection, QueryPlan, Selected};
use crate::session::{FlushMode, Session};
use crate::settings::DatabaseSettings;
use crate::value::{Value, ValueType};

// ------------- Connection & Schema -------------
/// Opens the database described by the settings. A missing path means an
/// in-memory database.
pub fn open(settings: &DatabaseSettings) -> Result<Connection> {
    let connection = match settings.path.as_deref() {
        None | Some(":memory:") => Connection::open_in_memory()?,
        Some(path) => Connection::open(path)?,
    };
    connection.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;
    if settings.foreign_keys {
        connection.pragma_update(None, "foreign_keys", true)?;
    }
    info!(path = settings.path.as_deref().unwrap_or(":memory:"), "opened database");
    Ok(connection)
}

/// Creates one table per entity type and one per owning many-to-many relation.
/// Foreign keys are checked when the surrounding transaction commits, so rows
/// may be written in any order within a flush.
pub fn create_schema(db: &Connection, dictionary: &dyn EntityDictionary) -> Result<()> {
    let mut ddl = String::new();
    for entity_type in dictionary.entity_types() {
        let binding = dictionary.entity_binding(entity_type)?;
        let mut columns = vec![format!(
            "{} {} not null primary key",
            quote(&binding.id_field),
            binding.id_type.affinity()
        )];
        for attribute in &binding.attributes {
            columns.push(format!("{} {} null", quote(&attribute.name), attribute.value_type.affinity()));
        }
        for (relation, column) in binding.foreign_keys() {
            let target = dictionary.entity_binding(&relation.target)?;
            columns.push(format!(
                "{} {} null references {}({}) deferrable initially deferred",
                quote(column),
                target.id_type.affinity(),
                quote(target.table_name()),
                quote(&target.id_field)
            ));
        }
        ddl += &format!(
            "create table if not exists {} (\n    {}\n);\n",
            quote(binding.table_name()),
            columns.join(",\n    ")
        );
        for relation in &binding.relations {
            if let RelationKind::ManyToMany { join_table, owner_column, inverse_column, owning: true } = &relation.kind {
                let target = dictionary.entity_binding(&relation.target)?;
                ddl += &format!(
                    "create table if not exists {jt} (\n    {oc} {ot} not null references {t}({ti}) deferrable initially deferred,\n    {ic} {it} not null references {tt}({tti}) deferrable initially deferred,\n    primary key ({oc}, {ic})\n);\n",
                    jt = quote(join_table),
                    oc = quote(owner_column),
                    ot = binding.id_type.affinity(),
                    t = quote(binding.table_name()),
                    ti = quote(&binding.id_field),
                    ic = quote(inverse_column),
                    it = target.id_type.affinity(),
                    tt = quote(target.table_name()),
                    tti = quote(&target.id_field),
                );
            }
        }
    }
    debug!(%ddl, "creating schema");
    db.execute_batch(&ddl)?;
    Ok(())
}

/// Number of stored rows per entity type, in declaration order.
pub fn row_counts(db: &Connection, dictionary: &dyn EntityDictionary) -> Result<Vec<(String, u64)>> {
    let mut counts = Vec::new();
    for entity_type in dictionary.entity_types() {
        let binding = dictionary.entity_binding(entity_type)?;
        let count: i64 = db.query_row(
            &format!("select count(*) from {}", quote(binding.table_name())),
            [],
            |r| r.get(0),
        )?;
        counts.push((binding.name.clone(), count as u64));
    }
    Ok(counts)
}

// ------------- Session -------------
/// What is needed to write one entity, taken while its lock is held.
struct Snapshot<'d> {
    binding: &'d EntityBinding,
    id: Value,
    columns: Vec<String>,
    values: Vec<Value>,
    links: Vec<(&'d RelationBinding, Vec<EntityRef>)>,
}

/// A persistence session over one SQLite connection. The session keeps an
/// SQLite transaction open from creation until it is flushed, finished or
/// dropped; dropping it unfinished rolls the open transaction back.
pub struct SqliteSession<'db> {
    db: &'db Connection,
    dictionary: SharedDictionary,
    flush_mode: FlushMode,
    finished: bool,
}

impl<'db> SqliteSession<'db> {
    pub fn begin(db: &'db Connection, dictionary: SharedDictionary, flush_mode: FlushMode) -> Result<Self> {
        db.execute_batch("begin deferred")?;
        debug!(?flush_mode, "session started");
        Ok(Self { db, dictionary, flush_mode, finished: false })
    }
    pub fn dictionary(&self) -> Arc<dyn EntityDictionary + Send + Sync> {
        Arc::clone(&self.dictionary)
    }
    /// Commits whatever the session still holds.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        if !self.db.is_autocommit() {
            self.db.execute_batch("commit")?;
        }
        Ok(())
    }
    /// Throws away whatever the session still holds.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        if !self.db.is_autocommit() {
            self.db.execute_batch("rollback")?;
        }
        Ok(())
    }

    fn snapshot<'d>(dictionary: &'d dyn EntityDictionary, entity: &EntityRef) -> Result<Snapshot<'d>> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut targets = Vec::new();
        let mut links = Vec::new();
        let (binding, id) = {
            let guard = entity.lock()?;
            let binding = dictionary.entity_binding(guard.entity_type())?;
            // a reference carries only its id, writing it would blank the stored row
            if guard.is_reference() {
                return Err(Error::execution(format!(
                    "'{}' {} is a reference, load it before storing it",
                    binding.name,
                    guard.id()
                )));
            }
            for attribute in &binding.attributes {
                let value = guard.attribute(&attribute.name).cloned().unwrap_or(Value::Null);
                if !value.fits(attribute.value_type) {
                    return Err(Error::execution(format!(
                        "Attribute '{}.{}' holds {value}, which is not {}",
                        binding.name, attribute.name, attribute.value_type
                    )));
                }
                columns.push(attribute.name.clone());
                values.push(value);
            }
            for (relation, column) in binding.foreign_keys() {
                columns.push(column.to_owned());
                targets.push(guard.to_one(&relation.name));
            }
            for relation in &binding.relations {
                if let RelationKind::ManyToMany { owning: true, .. } = relation.kind {
                    if let Some(Collection::Loaded(members)) = guard.collection(&relation.name) {
                        links.push((relation, members.clone()));
                    }
                }
            }
            (binding, guard.id().clone())
        };
        // targets are locked one at a time, after the entity itself was released
        for (target, (relation, _)) in targets.into_iter().zip(binding.foreign_keys()) {
            values.push(match target {
                Some(t) if t.same(entity) => id.clone(),
                Some(t) => {
                    let target_id = t.id()?;
                    if target_id.is_null() {
                        return Err(Error::execution(format!(
                            "The target of '{}.{}' has not been stored yet",
                            binding.name, relation.name
                        )));
                    }
                    target_id
                }
                None => Value::Null,
            });
        }
        Ok(Snapshot { binding, id, columns, values, links })
    }

    fn insert(&self, entity: &EntityRef, upsert: bool) -> Result<()> {
        let dictionary = self.dictionary.as_ref();
        let snapshot = Self::snapshot(dictionary, entity)?;
        let binding = snapshot.binding;
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let generated = snapshot.id.is_null();
        if generated {
            if binding.id_type != ValueType::Integer {
                return Err(Error::execution(format!(
                    "Entity '{}' has a text identifier which must be set before it is stored",
                    binding.name
                )));
            }
        } else {
            columns.push(binding.id_field.clone());
            values.push(snapshot.id.clone());
        }
        columns.extend(snapshot.columns.iter().cloned());
        values.extend(snapshot.values.iter().cloned());

        let quoted: Vec<String> = columns.iter().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let mut sql = if columns.is_empty() {
            format!("insert into {} default values", quote(binding.table_name()))
        } else {
            format!(
                "insert into {} ({}) values ({})",
                quote(binding.table_name()),
                quoted.join(", "),
                placeholders.join(", ")
            )
        };
        if upsert && !generated {
            let updates: Vec<String> = snapshot
                .columns
                .iter()
                .map(|c| format!("{q} = excluded.{q}", q = quote(c)))
                .collect();
            if updates.is_empty() {
                sql += &format!(" on conflict ({}) do nothing", quote(&binding.id_field));
            } else {
                sql += &format!(" on conflict ({}) do update set {}", quote(&binding.id_field), updates.join(", "));
            }
        }
        debug!(%sql, "writing entity");
        self.db.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;

        let id = if generated {
            let id = Value::Integer(self.db.last_insert_rowid());
            entity.lock()?.set_id(id.clone());
            id
        } else {
            snapshot.id
        };
        for (relation, members) in &snapshot.links {
            self.write_links(relation, &id, members)?;
        }
        Ok(())
    }

    fn write_links(&self, relation: &RelationBinding, owner: &Value, members: &[EntityRef]) -> Result<()> {
        if let RelationKind::ManyToMany { join_table, owner_column, inverse_column, .. } = &relation.kind {
            self.db
                .prepare_cached(&format!("delete from {} where {} = ?1", quote(join_table), quote(owner_column)))?
                .execute([owner])?;
            let mut insert = self.db.prepare_cached(&format!(
                "insert or ignore into {} ({}, {}) values (?1, ?2)",
                quote(join_table),
                quote(owner_column),
                quote(inverse_column)
            ))?;
            for member in members {
                let member_id = member.id()?;
                if member_id.is_null() {
                    return Err(Error::execution(format!(
                        "A member of '{}' has not been stored yet",
                        relation.name
                    )));
                }
                insert.execute(rusqlite::params![owner, member_id])?;
            }
        }
        Ok(())
    }

    fn hydrate(&self, binding: &EntityBinding, row: &rusqlite::Row<'_>) -> Result<EntityRef> {
        let dictionary = self.dictionary.as_ref();
        let mut entity = Entity::new(binding.name.as_str());
        for (i, selected) in selection(binding).iter().enumerate() {
            let raw = row.get_ref(i)?;
            match selected {
                Selected::Id => entity.set_id(Value::convert(binding.id_type, raw)?),
                Selected::Attribute(a) => entity.set_attribute(&a.name, Value::convert(a.value_type, raw)?),
                Selected::ForeignKey(relation, _) => {
                    let id = Value::convert(dictionary.id_type(&relation.target)?, raw)?;
                    let target = if id.is_null() {
                        None
                    } else {
                        Some(EntityRef::new(Entity::reference(relation.target.as_str(), id)))
                    };
                    entity.set(&relation.name, FieldValue::ToOne(target));
                }
            }
        }
        for relation in binding.relations.iter().filter(|r| r.is_to_many()) {
            let lazy = LazyCollection {
                owner_type: binding.name.clone(),
                owner_id: entity.id().clone(),
                relation: relation.name.clone(),
            };
            entity.set(&relation.name, FieldValue::ToMany(Collection::Lazy(lazy)));
        }
        Ok(EntityRef::new(entity))
    }
}

impl Session for SqliteSession<'_> {
    fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        self.insert(entity, false)
    }
    fn merge(&mut self, entity: &EntityRef) -> Result<()> {
        self.insert(entity, true)
    }
    fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        let (entity_type, id) = {
            let guard = entity.lock()?;
            (guard.entity_type().to_owned(), guard.id().clone())
        };
        let binding = self.dictionary.entity_binding(&entity_type)?;
        if id.is_null() {
            return Err(Error::execution(format!("Cannot remove a '{entity_type}' that was never stored")));
        }
        for relation in &binding.relations {
            if let RelationKind::ManyToMany { join_table, owner_column, .. } = &relation.kind {
                let exists = self
                    .db
                    .query_row(
                        "select 1 from sqlite_master where type = 'table' and name = ?1",
                        [join_table],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    self.db
                        .prepare_cached(&format!("delete from {} where {} = ?1", quote(join_table), quote(owner_column)))?
                        .execute([&id])?;
                }
            }
        }
        let removed = self
            .db
            .prepare_cached(&format!(
                "delete from {} where {} = ?1",
                quote(binding.table_name()),
                quote(&binding.id_field)
            ))?
            .execute([&id])?;
        if removed == 0 {
            debug!(entity = %entity_type, %id, "nothing to remove");
        }
        Ok(())
    }
    fn flush(&mut self) -> Result<()> {
        if !self.db.is_autocommit() {
            self.db.execute_batch("commit")?;
        }
        self.db.execute_batch("begin deferred")?;
        debug!("session flushed to the database");
        Ok(())
    }
    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }
    fn fetch(&mut self, plan: &QueryPlan) -> Result<Vec<EntityRef>> {
        let dictionary = Arc::clone(&self.dictionary);
        let binding = dictionary.entity_binding(&plan.entity_type)?;
        let mut statement = self.db.prepare_cached(&plan.sql)?;
        let mut rows = statement.query(params_from_iter(plan.params.iter()))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next()? {
            fetched.push(self.hydrate(binding, row)?);
        }
        Ok(fetched)
    }
    fn count(&mut self, plan: &QueryPlan) -> Result<u64> {
        let count: i64 = self
            .db
            .prepare_cached(&plan.sql)?
            .query_row(params_from_iter(plan.params.iter()), |r| r.get(0))?;
        Ok(count as u64)
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.db.is_autocommit() {
            if let Err(e) = self.db.execute_batch("rollback") {
                warn!(error = %e, "could not roll back an unfinished session");
            }
        }
    }
}
