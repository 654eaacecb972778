use relstore::dictionary::{Dictionary, EntityBinding};
use relstore::entity::{Collection, Entity, EntityRef, LazyCollection};
use relstore::error::Error;
use relstore::filter::{FilterExpression, Operator};
use relstore::pagination::Pagination;
use relstore::path::{FieldType, Path, PathElement};
use relstore::query::{QueryMode, QueryRequest};
use relstore::relationship::Relationship;
use relstore::sort::{SortOrder, Sorting};
use relstore::value::{Value, ValueType};

fn setup() -> Dictionary {
    Dictionary::new(vec![
        EntityBinding::new("author")
            .attribute("name", ValueType::Text)
            .to_many("books", "book", "author"),
        EntityBinding::new("book")
            .attribute("title", ValueType::Text)
            .attribute("year", ValueType::Integer)
            .attribute("rating", ValueType::Real)
            .to_one("author", "author", "author_id")
            .many_to_many("tags", "tag", "book_tag", "book_id", "tag_id", true),
        EntityBinding::new("tag").attribute("label", ValueType::Text),
    ])
    .unwrap()
}

const BOOK_COLUMNS: &str = r#"t0."id", t0."title", t0."year", t0."rating", t0."author_id""#;

fn path(dictionary: &Dictionary, root: &str, dotted: &str) -> Path {
    Path::parse(dictionary, root, dotted).unwrap()
}

fn construction_error(dictionary: &Dictionary, filter: &FilterExpression) -> bool {
    matches!(
        QueryRequest::root("book").filter(Some(filter)).build(dictionary),
        Err(Error::QueryConstruction(_))
    )
}

#[test]
fn plain_fetch_and_count() {
    let dictionary = setup();
    let plan = QueryRequest::root("book").build(&dictionary).unwrap().unwrap();
    assert_eq!(plan.mode, QueryMode::Fetch);
    assert_eq!(plan.sql, format!(r#"select {BOOK_COLUMNS} from "book" t0"#));
    assert!(plan.params.is_empty());

    let count = QueryRequest::root("book").count().build(&dictionary).unwrap().unwrap();
    assert_eq!(count.mode, QueryMode::Count);
    assert_eq!(count.sql, r#"select count(distinct t0."id") from "book" t0"#);
}

#[test]
fn to_one_steps_become_left_joins() {
    let dictionary = setup();
    let filter = FilterExpression::predicate(path(&dictionary, "book", "author.name"), Operator::Eq, vec!["Lem".into()]);
    let plan = QueryRequest::root("book").filter(Some(&filter)).build(&dictionary).unwrap().unwrap();
    assert_eq!(
        plan.sql,
        format!(
            r#"select {BOOK_COLUMNS} from "book" t0 left join "author" t1 on t1."id" = t0."author_id" where t1."name" = ?1"#
        )
    );
    assert_eq!(plan.params, vec![Value::from("Lem")]);
}

#[test]
fn shared_prefixes_share_a_join() {
    let dictionary = setup();
    let name = path(&dictionary, "book", "author.name");
    let id = path(&dictionary, "book", "author.id");
    let filter = FilterExpression::predicate(name, Operator::Prefix, vec!["S".into()])
        .or(&FilterExpression::predicate(id, Operator::In, vec![1i64.into(), 2i64.into()]));
    let plan = QueryRequest::root("book").filter(Some(&filter)).build(&dictionary).unwrap().unwrap();
    assert_eq!(plan.sql.matches("left join").count(), 1);
    assert!(plan.sql.ends_with(r#"where (substr(t1."name", 1, length(?1)) = ?1 or t1."id" in (?2, ?3))"#));
    assert_eq!(plan.params.len(), 3);
}

#[test]
fn to_many_steps_make_the_selection_distinct() {
    let dictionary = setup();
    let filter = FilterExpression::predicate(path(&dictionary, "author", "books.year"), Operator::Lt, vec![1970i64.into()]);
    let plan = QueryRequest::root("author").filter(Some(&filter)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.starts_with("select distinct "));
    assert!(plan.sql.contains(r#"left join "book" t1 on t1."author_id" = t0."id""#));

    let tagged = FilterExpression::predicate(path(&dictionary, "book", "tags.label"), Operator::Eq, vec!["scifi".into()]);
    let plan = QueryRequest::root("book").filter(Some(&tagged)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.starts_with("select distinct "));
    assert!(plan.sql.contains(r#"left join "book_tag" j1 on j1."book_id" = t0."id" left join "tag" t1 on t1."id" = j1."tag_id""#));
}

#[test]
fn sorting_ends_with_the_identifier() {
    let dictionary = setup();
    let sorting = Sorting::new().by(path(&dictionary, "book", "title"), SortOrder::Descending);
    let plan = QueryRequest::root("book").sorting(Some(&sorting)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.ends_with(r#"order by t0."title" desc, t0."id" asc"#));

    // counting ignores sorting and the window
    let page = Pagination::from_page(2, 10).unwrap();
    let count = QueryRequest::root("book")
        .sorting(Some(&sorting))
        .pagination(Some(&page))
        .count()
        .build(&dictionary)
        .unwrap()
        .unwrap();
    assert!(!count.sql.contains("order by"));
    assert!(!count.sql.contains("limit"));
}

#[test]
fn sorting_across_to_many_relations_is_rejected() {
    let dictionary = setup();
    let sorting = Sorting::new().by(path(&dictionary, "author", "books.title"), SortOrder::Ascending);
    assert!(matches!(
        QueryRequest::root("author").sorting(Some(&sorting)).build(&dictionary),
        Err(Error::QueryConstruction(_))
    ));
}

#[test]
fn windows_become_limit_and_offset() {
    let dictionary = setup();
    let page = Pagination::from_page(3, 10).unwrap();
    let plan = QueryRequest::root("tag").pagination(Some(&page)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.ends_with("limit ?1 offset ?2"));
    assert_eq!(plan.params, vec![Value::Integer(10), Value::Integer(20)]);
}

#[test]
fn degenerate_predicates() {
    let dictionary = setup();
    let year = path(&dictionary, "book", "year");
    let nothing = FilterExpression::predicate(year.clone(), Operator::In, Vec::new());
    let plan = QueryRequest::root("book").filter(Some(&nothing)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.ends_with("where 1 = 0"));

    let everything = FilterExpression::predicate(year.clone(), Operator::True, Vec::new()).not();
    let plan = QueryRequest::root("book").filter(Some(&everything)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.ends_with("where not (1 = 1)"));

    let between = FilterExpression::predicate(year, Operator::Between, vec![1950i64.into(), 1960i64.into()]);
    let plan = QueryRequest::root("book").filter(Some(&between)).build(&dictionary).unwrap().unwrap();
    assert!(plan.sql.ends_with(r#"where t0."year" between ?1 and ?2"#));
}

#[test]
fn malformed_filters_are_construction_errors() {
    let dictionary = setup();
    let year = path(&dictionary, "book", "year");
    let title = path(&dictionary, "book", "title");
    let rating = path(&dictionary, "book", "rating");

    // arity
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(year.clone(), Operator::Between, vec![1950i64.into()])
    ));
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(year.clone(), Operator::IsNull, vec![1950i64.into()])
    ));
    // operand types
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(year.clone(), Operator::Eq, vec!["1950".into()])
    ));
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(title.clone(), Operator::Eq, vec![Value::Null])
    ));
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(year.clone(), Operator::Prefix, vec![19i64.into()])
    ));
    // integers widen for real fields
    assert!(!construction_error(
        &dictionary,
        &FilterExpression::predicate(rating, Operator::Ge, vec![4i64.into()])
    ));
    // paths from another root, unknown fields, and paths ending at a relation
    assert!(construction_error(
        &dictionary,
        &FilterExpression::predicate(path(&dictionary, "author", "name"), Operator::Eq, vec!["Lem".into()])
    ));
    let unknown = Path::from_element(PathElement::new("book", FieldType::Value(ValueType::Text), "isbn"));
    assert!(construction_error(&dictionary, &FilterExpression::predicate(unknown, Operator::NotNull, Vec::new())));
    let relation = Path::from_element(PathElement::new("book", FieldType::Entity("author".to_owned()), "author"));
    assert!(construction_error(&dictionary, &FilterExpression::predicate(relation, Operator::NotNull, Vec::new())));
    // an unknown root
    assert!(matches!(
        QueryRequest::root("planet").build(&dictionary),
        Err(Error::QueryConstruction(_))
    ));
}

#[test]
fn relation_targets_are_scoped_to_the_parent() {
    let dictionary = setup();
    let author = EntityRef::new(Entity::new("author").with_id(7i64));
    let lazy = Collection::Lazy(LazyCollection {
        owner_type: "author".to_owned(),
        owner_id: Value::Integer(7),
        relation: "books".to_owned(),
    });
    let relationship = Relationship::new("author", "book", "books", author.clone(), lazy);
    let plan = QueryRequest::relation(&relationship).build(&dictionary).unwrap().unwrap();
    assert_eq!(plan.entity_type, "book");
    assert!(plan.sql.ends_with(r#"where t0."author_id" = ?1"#));
    assert_eq!(plan.params, vec![Value::Integer(7)]);

    let book = EntityRef::new(Entity::new("book").with_id(3i64));
    let tags = Collection::Lazy(LazyCollection {
        owner_type: "book".to_owned(),
        owner_id: Value::Integer(3),
        relation: "tags".to_owned(),
    });
    let relationship = Relationship::new("book", "tag", "tags", book.clone(), tags);
    let label = path(&dictionary, "tag", "label");
    let filter = FilterExpression::predicate(label, Operator::Infix, vec!["fi".into()]);
    let plan = QueryRequest::relation(&relationship).filter(Some(&filter)).build(&dictionary).unwrap().unwrap();
    assert_eq!(
        plan.sql,
        r#"select t0."id", t0."label" from "tag" t0 join "book_tag" s0 on s0."tag_id" = t0."id" where s0."book_id" = ?1 and instr(t0."label", ?2) > 0"#
    );

    // a loaded collection is already the answer
    let loaded = Relationship::new("book", "tag", "tags", book, Collection::empty());
    assert!(QueryRequest::relation(&loaded).build(&dictionary).unwrap().is_none());
}

#[test]
fn pagination_bounds() {
    assert!(matches!(Pagination::from_page(0, 10), Err(Error::Pagination(_))));
    assert!(matches!(Pagination::new(0, 0), Err(Error::Pagination(_))));
    assert!(matches!(
        Pagination::new(0, Pagination::MAX_LIMIT + 1),
        Err(Error::Pagination(_))
    ));
    let page = Pagination::default();
    assert_eq!((page.offset(), page.limit()), (0, Pagination::DEFAULT_LIMIT));
    assert!(!page.generate_totals());
}
