//! Mutation scenarios: round-trip through insert and reduction, upsert
//! column preservation, transactional upsert fallback.

use crate::common::{row, FakeSource};
use rowgraph::exec::{query::find_by_id, ExecResult, Mutator};
use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
use rowgraph::sql::Dialect;
use serde_json::{json, Map};

fn user_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("User")
                .table("user")
                .id("id", ColumnType::Long)
                .scalar("firstName", ColumnType::VarChar(100))
                .scalar("lastName", ColumnType::VarChar(100))
                .scalar("age", ColumnType::Int)
                .finish(),
        )
        .unwrap();
    registry
}

#[test]
fn insert_then_find_by_id_round_trips_scalars() {
    let registry = user_registry();

    // insert: the database generates id 7
    let mut source = FakeSource::with_exec_results(vec![ExecResult {
        affected_rows: 1,
        generated_ids: vec![json!(7)],
    }]);
    let mutator = Mutator::with_dialect(&registry, Dialect::MySql);
    let mut record = Map::new();
    record.insert("firstName".into(), json!("Ann"));
    record.insert("lastName".into(), json!("Author"));
    record.insert("age".into(), json!(44));
    let id = mutator.insert(&mut source, "User", &record).unwrap();
    assert_eq!(id, json!(7));

    let insert = &source.statements[0];
    assert_eq!(
        insert.sql,
        "INSERT INTO `user` (`firstName`, `lastName`, `age`) VALUES (?, ?, ?)"
    );
    assert_eq!(insert.params, vec![json!("Ann"), json!("Author"), json!(44)]);

    // answer the lookup with the row the insert produced
    let mut read_source = FakeSource::with_rows(vec![row(&[
        ("user.id", json!(7)),
        ("user.firstName", insert.params[0].clone()),
        ("user.lastName", insert.params[1].clone()),
        ("user.age", insert.params[2].clone()),
    ])]);
    let found = find_by_id(&registry, "User", id, &mut read_source)
        .unwrap()
        .unwrap();
    assert_eq!(found["firstName"], json!("Ann"));
    assert_eq!(found["lastName"], json!("Author"));
    assert_eq!(found["age"], json!(44));
}

#[test]
fn upsert_touches_only_supplied_columns() {
    let registry = user_registry();
    let mut source = FakeSource::default();
    let mutator = Mutator::with_dialect(&registry, Dialect::MySql);
    // the record carries id and firstName only; lastName and age must
    // survive an update untouched
    let mut record = Map::new();
    record.insert("id".into(), json!(7));
    record.insert("firstName".into(), json!("Anna"));
    mutator.upsert(&mut source, "User", &record).unwrap();
    let sql = &source.statements[0].sql;
    assert_eq!(
        sql,
        "INSERT INTO `user` (`id`, `firstName`) VALUES (?, ?) \
ON DUPLICATE KEY UPDATE `firstName` = VALUES(`firstName`)"
    );
    assert!(!sql.contains("lastName"));
    assert!(!sql.contains("age"));
}

#[test]
fn postgres_upsert_uses_on_conflict() {
    let registry = user_registry();
    let mut source = FakeSource::default();
    let mutator = Mutator::with_dialect(&registry, Dialect::Postgres);
    let mut record = Map::new();
    record.insert("id".into(), json!(7));
    record.insert("firstName".into(), json!("Anna"));
    mutator.upsert(&mut source, "User", &record).unwrap();
    let sql = &source.statements[0].sql;
    assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"firstName\" = EXCLUDED.\"firstName\""));
}

#[test]
fn fallback_upsert_runs_in_a_transaction() {
    let registry = user_registry();
    // the update hits an existing row: no insert follows
    let mut source = FakeSource::with_exec_results(vec![ExecResult {
        affected_rows: 1,
        generated_ids: vec![],
    }]);
    let mutator = Mutator::with_dialect(&registry, Dialect::Hsqldb);
    let mut record = Map::new();
    record.insert("id".into(), json!(7));
    record.insert("firstName".into(), json!("Anna"));
    mutator.upsert(&mut source, "User", &record).unwrap();
    assert_eq!(source.transactions, vec!["begin", "commit"]);
    assert_eq!(source.statements.len(), 1);
    assert!(source.statements[0].sql.starts_with("UPDATE user SET"));
}

#[test]
fn update_skips_no_update_fields() {
    use rowgraph::model::{FieldDef, FieldKind};
    let mut registry = ModelRegistry::new();
    let mut created = FieldDef::with_kind("createdAt", FieldKind::Scalar(ColumnType::Timestamp));
    created.no_update = true;
    registry
        .register(
            RecordType::build("Note")
                .table("note")
                .id("id", ColumnType::Long)
                .scalar("body", ColumnType::Text)
                .field(created)
                .finish(),
        )
        .unwrap();
    let mut source = FakeSource::with_exec_results(vec![ExecResult {
        affected_rows: 1,
        generated_ids: vec![],
    }]);
    let mutator = Mutator::with_dialect(&registry, Dialect::MySql);
    let mut record = Map::new();
    record.insert("id".into(), json!(1));
    record.insert("body".into(), json!("x"));
    record.insert("createdAt".into(), json!("2024-01-01T00:00:00"));
    mutator.update(&mut source, "Note", &record).unwrap();
    let sql = &source.statements[0].sql;
    assert!(sql.contains("`body` = ?"));
    assert!(!sql.contains("createdAt"));
}
