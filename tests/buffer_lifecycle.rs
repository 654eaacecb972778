use std::sync::Arc;

use relstore::buffer::{PendingOperation, TransactionBuffer, TransactionState};
use relstore::dictionary::{Dictionary, EntityBinding};
use relstore::entity::{Collection, Entity, EntityRef, FieldValue};
use relstore::error::{Error, Result};
use relstore::filter::{FilterExpression, Operator};
use relstore::pagination::Pagination;
use relstore::path::Path;
use relstore::query::QueryPlan;
use relstore::session::{FlushMode, Session};
use relstore::sort::{SortOrder, Sorting};
use relstore::transaction::Transaction;
use relstore::value::{Value, ValueType};

/// Remembers every call instead of touching a store.
#[derive(Default)]
struct Recorder {
    calls: Vec<(&'static str, EntityRef)>,
    flushes: usize,
    queries: usize,
    mode: FlushMode,
    fail_on_remove: bool,
}

impl Session for Recorder {
    fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        self.calls.push(("persist", entity.clone()));
        Ok(())
    }
    fn merge(&mut self, entity: &EntityRef) -> Result<()> {
        self.calls.push(("merge", entity.clone()));
        Ok(())
    }
    fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        if self.fail_on_remove {
            return Err(Error::InvalidState("store refused the delete".to_owned()));
        }
        self.calls.push(("remove", entity.clone()));
        Ok(())
    }
    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
    fn flush_mode(&self) -> FlushMode {
        self.mode
    }
    fn fetch(&mut self, _plan: &QueryPlan) -> Result<Vec<EntityRef>> {
        self.queries += 1;
        Ok(Vec::new())
    }
    fn count(&mut self, _plan: &QueryPlan) -> Result<u64> {
        self.queries += 1;
        Ok(0)
    }
}

fn dictionary() -> Arc<Dictionary> {
    Arc::new(
        Dictionary::new(vec![
            EntityBinding::new("author")
                .attribute("name", ValueType::Text)
                .to_many("books", "book", "author"),
            EntityBinding::new("book")
                .attribute("title", ValueType::Text)
                .to_one("author", "author", "author_id"),
        ])
        .unwrap(),
    )
}

fn book(title: &str) -> EntityRef {
    EntityRef::new(Entity::new("book").with("title", title))
}

#[test]
fn rollback_never_reaches_the_session() {
    let mut recorder = Recorder::default();
    let mut tx = Transaction::new(&mut recorder, dictionary());
    let (a, b, c) = (book("a"), book("b"), book("c"));
    tx.create_object(&a).unwrap();
    tx.save(&b).unwrap();
    tx.delete(&c).unwrap();
    assert_eq!(tx.pending().len(), 3);
    tx.rollback();
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(tx.pending().is_empty());
    assert!(tx.close().is_ok());
    assert!(recorder.calls.is_empty());
    assert_eq!(recorder.flushes, 0);
}

#[test]
fn flush_applies_each_operation_once_in_order() {
    let mut recorder = Recorder::default();
    let (a, b, c) = (book("a"), book("b"), book("c"));
    let mut tx = Transaction::new(&mut recorder, dictionary());
    tx.create_object(&a).unwrap();
    tx.save(&b).unwrap();
    tx.delete(&c).unwrap();
    // no deduplication: the second create runs as well
    tx.create_object(&a).unwrap();
    tx.flush().unwrap();
    assert_eq!(tx.state(), TransactionState::Flushed);
    assert!(tx.pending().is_empty());
    // a second flush has nothing left to apply
    tx.flush().unwrap();

    let names: Vec<&str> = recorder.calls.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["persist", "merge", "remove", "persist"]);
    assert!(recorder.calls[0].1.same(&a));
    assert!(recorder.calls[1].1.same(&b));
    assert!(recorder.calls[2].1.same(&c));
    assert!(recorder.calls[3].1.same(&a));
    assert_eq!(recorder.flushes, 2);
}

#[test]
fn commit_mode_leaves_the_session_unflushed() {
    let mut recorder = Recorder { mode: FlushMode::Commit, ..Default::default() };
    let mut tx = Transaction::new(&mut recorder, dictionary());
    tx.create_object(&book("a")).unwrap();
    tx.commit().unwrap();
    assert_eq!(recorder.calls.len(), 1);
    assert_eq!(recorder.flushes, 0);
}

#[test]
fn close_with_pending_operations_discards_them() {
    let mut buffer = TransactionBuffer::new();
    buffer.enqueue(PendingOperation::Create(book("a"))).unwrap();
    buffer.enqueue(PendingOperation::Save(book("b"))).unwrap();
    match buffer.close() {
        Err(Error::TransactionNotClosed { pending }) => assert_eq!(pending, 2),
        other => panic!("expected TransactionNotClosed, got {other:?}"),
    }
    assert!(buffer.is_empty());
    assert_eq!(buffer.state(), TransactionState::RolledBack);
    // the pending work is gone, so closing again succeeds
    buffer.close().unwrap();
    assert_eq!(buffer.state(), TransactionState::Closed);
    buffer.close().unwrap();
}

#[test]
fn close_after_flush_succeeds() {
    let mut recorder = Recorder::default();
    let mut tx = Transaction::new(&mut recorder, dictionary());
    tx.create_object(&book("a")).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();
    assert_eq!(tx.state(), TransactionState::Closed);
}

#[test]
fn enqueue_reopens_a_flushed_buffer_but_not_a_finished_one() {
    let mut recorder = Recorder::default();
    let mut buffer = TransactionBuffer::new();
    buffer.enqueue(PendingOperation::Create(book("a"))).unwrap();
    buffer.flush(&mut recorder).unwrap();
    assert_eq!(buffer.state(), TransactionState::Flushed);
    buffer.enqueue(PendingOperation::Save(book("a"))).unwrap();
    assert_eq!(buffer.state(), TransactionState::Open);

    buffer.rollback();
    assert!(matches!(
        buffer.enqueue(PendingOperation::Delete(book("a"))),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(buffer.flush(&mut recorder), Err(Error::InvalidState(_))));

    let mut closed = TransactionBuffer::new();
    closed.close().unwrap();
    assert!(matches!(
        closed.enqueue(PendingOperation::Create(book("b"))),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn session_failures_surface_as_execution_errors() {
    let mut recorder = Recorder { fail_on_remove: true, ..Default::default() };
    let mut tx = Transaction::new(&mut recorder, dictionary());
    tx.create_object(&book("a")).unwrap();
    tx.delete(&book("b")).unwrap();
    let err = tx.flush().unwrap_err();
    assert!(err.is_execution(), "unexpected error {err:?}");
    tx.rollback();
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(recorder.flushes, 0);
}

#[test]
fn unknown_entity_types_are_not_buffered() {
    let mut recorder = Recorder::default();
    let mut tx = Transaction::new(&mut recorder, dictionary());
    let stranger = EntityRef::new(Entity::new("planet"));
    assert!(matches!(tx.create_object(&stranger), Err(Error::QueryConstruction(_))));
    assert!(tx.pending().is_empty());
}

#[test]
fn in_memory_relation_values_come_back_unchanged() {
    let mut recorder = Recorder::default();
    let author = EntityRef::new(Entity::new("author").with_id(1i64).with("name", "Herbert"));
    let members = vec![book("Dune"), book("Whipping Star")];
    let detached = EntityRef::new(
        Entity::new("author")
            .with_id(2i64)
            .with_members("books", members.clone()),
    );
    let written = EntityRef::new(Entity::new("book").with("title", "Dune").with_to_one("author", &author));
    let mut tx = Transaction::new(&mut recorder, dictionary());

    match tx.get_relation(&written, "author", None, None, None).unwrap() {
        FieldValue::ToOne(Some(target)) => assert!(target.same(&author)),
        other => panic!("unexpected {other:?}"),
    }
    match tx.get_relation(&detached, "books", None, None, None).unwrap() {
        FieldValue::ToMany(Collection::Loaded(found)) => {
            assert_eq!(found.len(), 2);
            assert!(found[0].same(&members[0]));
            assert!(found[1].same(&members[1]));
        }
        other => panic!("unexpected {other:?}"),
    }
    match tx.get_relation(&author, "name", None, None, None).unwrap() {
        FieldValue::Attribute(value) => assert_eq!(value, Value::from("Herbert")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        tx.get_relation(&author, "publisher", None, None, None),
        Err(Error::InvalidAttribute { .. })
    ));
    assert_eq!(recorder.queries, 0);
}

#[test]
fn query_options_are_ignored_for_in_memory_values() {
    let mut recorder = Recorder::default();
    let dictionary = dictionary();
    let author = EntityRef::new(Entity::new("author").with_id(1i64).with("name", "Herbert"));
    let members = vec![book("Dune"), book("Whipping Star")];
    let detached = EntityRef::new(
        Entity::new("author")
            .with_id(2i64)
            .with_members("books", members.clone()),
    );
    let written = EntityRef::new(Entity::new("book").with("title", "Dune").with_to_one("author", &author));
    let by_title = Path::parse(dictionary.as_ref(), "book", "title").unwrap();
    let filter = FilterExpression::predicate(by_title.clone(), Operator::Eq, vec!["Dune".into()]);
    let sorting = Sorting::new().by(by_title, SortOrder::Descending);
    let mut page = Pagination::from_page(2, 1).unwrap().with_totals();
    let mut tx = Transaction::new(&mut recorder, dictionary.clone());

    match tx
        .get_relation(&detached, "books", Some(&filter), Some(&sorting), Some(&mut page))
        .unwrap()
    {
        FieldValue::ToMany(Collection::Loaded(found)) => {
            assert_eq!(found.len(), 2);
            assert!(found[0].same(&members[0]));
            assert!(found[1].same(&members[1]));
        }
        other => panic!("unexpected {other:?}"),
    }
    match tx
        .get_relation(&written, "author", Some(&filter), Some(&sorting), Some(&mut page))
        .unwrap()
    {
        FieldValue::ToOne(Some(target)) => assert!(target.same(&author)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(page.page_totals(), None);
    assert_eq!(recorder.queries, 0);
}

#[test]
fn missing_id_never_matches() {
    let mut recorder = Recorder::default();
    let mut tx = Transaction::new(&mut recorder, dictionary());
    assert!(tx.load_object("book", None, None).unwrap().is_none());
    assert!(tx.load_object("book", Some(Value::Null), None).unwrap().is_none());
}

#[test]
fn principals_pass_through() {
    let mut recorder = Recorder::default();
    let tx = Transaction::new(&mut recorder, dictionary());
    let user = tx.access_user("alice".to_owned());
    assert_eq!(user.principal::<String>().map(String::as_str), Some("alice"));
    assert!(user.principal::<u32>().is_none());
}
