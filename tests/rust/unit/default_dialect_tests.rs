//! The process-wide default dialect is shared mutable state; these tests are
//! serialised so they never race other tests that read it.

use rowgraph::exec::Query;
use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
use rowgraph::sql::{default_dialect, set_default_dialect, Dialect};
use serial_test::serial;

fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("User")
                .table("user")
                .id("id", ColumnType::Long)
                .finish(),
        )
        .unwrap();
    registry
}

#[test]
#[serial]
fn queries_pick_up_the_default_dialect() {
    let before = default_dialect();
    set_default_dialect(Dialect::Postgres);
    let statement = Query::build(&registry(), "User")
        .unwrap()
        .to_statement()
        .unwrap();
    assert!(statement.sql.contains("\"user\".\"id\" AS \"user.id\""));
    set_default_dialect(before);
}

#[test]
#[serial]
fn explicit_dialect_overrides_the_default() {
    let before = default_dialect();
    set_default_dialect(Dialect::Postgres);
    let mut query = Query::build(&registry(), "User").unwrap();
    query.set_dialect(Dialect::MySql);
    let statement = query.to_statement().unwrap();
    assert!(statement.sql.contains("`user`.`id` AS `user.id`"));
    set_default_dialect(before);
}
