//! The streaming facade: implicit root ordering, the joined-alias ordering
//! contract, and parity with the eager path.

use crate::common::{row, FakeSource};
use rowgraph::error::Error;
use rowgraph::exec::Query;
use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
use rowgraph::sql::{Dialect, SqlError};
use serde_json::json;

fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("Book")
                .table("book")
                .id("id", ColumnType::Long)
                .scalar("year", ColumnType::Int)
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Author")
                .table("author")
                .id("id", ColumnType::Long)
                .scalar("name", ColumnType::VarChar(100))
                .to_many("books", "Book")
                .finish(),
        )
        .unwrap();
    registry
}

fn grouped_rows() -> Vec<rowgraph::Row> {
    vec![
        row(&[
            ("author.id", json!(1)),
            ("author.name", json!("ann")),
            ("books.id", json!(11)),
            ("books.year", json!(1999)),
        ]),
        row(&[
            ("author.id", json!(1)),
            ("author.name", json!("ann")),
            ("books.id", json!(12)),
            ("books.year", json!(2004)),
        ]),
        row(&[
            ("author.id", json!(2)),
            ("author.name", json!("bob")),
            ("books.id", json!(21)),
            ("books.year", json!(2011)),
        ]),
    ]
}

#[test]
fn ordering_by_a_joined_alias_fails_before_execution() {
    let registry = registry();
    let mut source = FakeSource::default();
    let mut query = Query::build(&registry, "Author").unwrap();
    query.add_order_by("{books}.year");
    let err = query.stream(&mut source, |_| Ok(())).unwrap_err();
    match err {
        Error::Sql(SqlError::OrderByJoinedAlias { fragment }) => {
            assert!(fragment.contains("{books}.year"));
        }
        other => panic!("expected the ordering contract error, got {:?}", other),
    }
    // nothing reached the row source
    assert!(source.statements.is_empty());
}

#[test]
fn streaming_without_order_gets_implicit_root_order() {
    let registry = registry();
    let mut source = FakeSource::with_rows(grouped_rows());
    let mut query = Query::build(&registry, "Author").unwrap();
    query.set_dialect(Dialect::MySql);
    let mut emitted = Vec::new();
    let count = query
        .stream(&mut source, |root| {
            emitted.push(root);
            Ok(())
        })
        .unwrap();
    assert_eq!(count, 2);
    assert!(source.statements[0].sql.contains("ORDER BY `author`.id"));
    assert_eq!(emitted[0]["name"], json!("ann"));
    assert_eq!(emitted[0]["books"].as_array().unwrap().len(), 2);
    assert_eq!(emitted[1]["name"], json!("bob"));
}

#[test]
fn streaming_equals_eager_list() {
    let registry = registry();
    let query = Query::build(&registry, "Author").unwrap();

    let mut eager_source = FakeSource::with_rows(grouped_rows());
    let eager = query.execute(&mut eager_source).unwrap();

    let mut streaming_source = FakeSource::with_rows(grouped_rows());
    let mut streamed = Vec::new();
    query
        .stream(&mut streaming_source, |root| {
            streamed.push(root);
            Ok(())
        })
        .unwrap();
    assert_eq!(streamed, eager);
}

#[test]
fn consumer_error_propagates() {
    let registry = registry();
    let mut source = FakeSource::with_rows(grouped_rows());
    let query = Query::build(&registry, "Author").unwrap();
    let err = query
        .stream(&mut source, |_| {
            Err(Error::Sql(SqlError::UnboundParameter {
                name: "halt".into(),
            }))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Sql(SqlError::UnboundParameter { .. })));
}
