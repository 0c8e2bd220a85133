//! Subclass materialisation: table-per-subclass rooms and single-table
//! discriminated shapes.

use crate::common::{row, FakeSource};
use rowgraph::exec::Query;
use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
use rowgraph::sql::Dialect;
use serde::Deserialize;
use serde_json::json;

fn rooms_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("Room")
                .table("room")
                .id("id", ColumnType::Long)
                .scalar("area", ColumnType::Double)
                .subclasses(&["BedRoom", "Kitchen"])
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("BedRoom")
                .table("bedroom")
                .parent("Room")
                .scalar("beds", ColumnType::Int)
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Kitchen")
                .table("kitchen")
                .parent("Room")
                .scalar("hasDishwasher", ColumnType::Boolean)
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Apartment")
                .table("apartment")
                .id("id", ColumnType::Long)
                .to_many("rooms", "Room")
                .finish(),
        )
        .unwrap();
    registry
}

#[test]
fn branch_joins_project_id_and_branch_fields() {
    let registry = rooms_registry();
    let mut query = Query::build(&registry, "Apartment").unwrap();
    query.set_dialect(Dialect::MySql);
    let sql = query.to_statement().unwrap().sql;
    assert!(sql.contains("LEFT JOIN `bedroom` AS `rooms.bedroom` ON `rooms`.`id` = `rooms.bedroom`.`id`"));
    assert!(sql.contains("LEFT JOIN `kitchen` AS `rooms.kitchen` ON `rooms`.`id` = `rooms.kitchen`.`id`"));
    assert!(sql.contains("`rooms.bedroom`.`beds` AS `rooms.bedroom.beds`"));
}

#[test]
fn rooms_materialise_as_their_concrete_types() {
    let registry = rooms_registry();
    let rows = vec![
        row(&[
            ("apartment.id", json!(1)),
            ("rooms.id", json!(20)),
            ("rooms.area", json!(16.5)),
            ("rooms.bedroom.id", json!(20)),
            ("rooms.bedroom.beds", json!(2)),
            ("rooms.kitchen.id", json!(null)),
            ("rooms.kitchen.hasDishwasher", json!(null)),
        ]),
        row(&[
            ("apartment.id", json!(1)),
            ("rooms.id", json!(21)),
            ("rooms.area", json!(9.0)),
            ("rooms.bedroom.id", json!(null)),
            ("rooms.bedroom.beds", json!(null)),
            ("rooms.kitchen.id", json!(21)),
            ("rooms.kitchen.hasDishwasher", json!(1)),
        ]),
    ];
    let mut source = FakeSource::with_rows(rows);
    let apartments = Query::build(&registry, "Apartment")
        .unwrap()
        .execute(&mut source)
        .unwrap();
    assert_eq!(apartments.len(), 1);
    let rooms = apartments[0]["rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0]["_type"], json!("BedRoom"));
    assert_eq!(rooms[0]["beds"], json!(2));
    assert_eq!(rooms[0]["area"], json!(16.5));
    assert!(rooms[0].get("hasDishwasher").is_none());
    assert_eq!(rooms[1]["_type"], json!("Kitchen"));
    assert_eq!(rooms[1]["hasDishwasher"], json!(true));
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_type")]
enum RoomView {
    BedRoom { id: i64, beds: i64 },
    Kitchen {
        id: i64,
        #[serde(rename = "hasDishwasher")]
        has_dishwasher: bool,
    },
}

#[derive(Debug, Deserialize)]
struct ApartmentView {
    rooms: Vec<RoomView>,
}

#[test]
fn tagged_enum_deserialisation_of_branches() {
    let registry = rooms_registry();
    let rows = vec![
        row(&[
            ("apartment.id", json!(1)),
            ("rooms.id", json!(20)),
            ("rooms.area", json!(16.5)),
            ("rooms.bedroom.id", json!(20)),
            ("rooms.bedroom.beds", json!(2)),
            ("rooms.kitchen.id", json!(null)),
            ("rooms.kitchen.hasDishwasher", json!(null)),
        ]),
        row(&[
            ("apartment.id", json!(1)),
            ("rooms.id", json!(21)),
            ("rooms.area", json!(9.0)),
            ("rooms.bedroom.id", json!(null)),
            ("rooms.bedroom.beds", json!(null)),
            ("rooms.kitchen.id", json!(21)),
            ("rooms.kitchen.hasDishwasher", json!(1)),
        ]),
    ];
    let mut source = FakeSource::with_rows(rows);
    let apartments: Vec<ApartmentView> = Query::build(&registry, "Apartment")
        .unwrap()
        .fetch_as(&mut source)
        .unwrap();
    assert!(matches!(apartments[0].rooms[0], RoomView::BedRoom { id: 20, beds: 2 }));
    assert!(matches!(
        apartments[0].rooms[1],
        RoomView::Kitchen {
            id: 21,
            has_dishwasher: true,
        }
    ));
}

#[test]
fn single_table_discriminator_selects_the_branch() {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("Shape")
                .table("shape")
                .id("id", ColumnType::Long)
                .subclasses(&["Circle", "Square"])
                .discriminator("kind")
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Circle")
                .parent("Shape")
                .discriminator_value("circle")
                .scalar("radius", ColumnType::Double)
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Square")
                .parent("Shape")
                .discriminator_value("square")
                .scalar("side", ColumnType::Double)
                .finish(),
        )
        .unwrap();

    let mut query = Query::build(&registry, "Shape").unwrap();
    query.set_dialect(Dialect::MySql);
    let sql = query.to_statement().unwrap().sql;
    // single-table branches never join; their columns come off the root table
    assert!(!sql.contains("JOIN"));
    assert!(sql.contains("`shape`.`kind` AS `shape.kind`"));
    assert!(sql.contains("`shape`.`radius` AS `shape.circle.radius`"));

    let rows = vec![
        row(&[
            ("shape.id", json!(1)),
            ("shape.kind", json!("circle")),
            ("shape.circle.radius", json!(2.0)),
            ("shape.square.side", json!(null)),
        ]),
        row(&[
            ("shape.id", json!(2)),
            ("shape.kind", json!("square")),
            ("shape.circle.radius", json!(null)),
            ("shape.square.side", json!(3.0)),
        ]),
        row(&[
            ("shape.id", json!(3)),
            ("shape.kind", json!(null)),
            ("shape.circle.radius", json!(null)),
            ("shape.square.side", json!(null)),
        ]),
    ];
    let mut source = FakeSource::with_rows(rows);
    let shapes = query.execute(&mut source).unwrap();
    assert_eq!(shapes[0]["_type"], json!("Circle"));
    assert_eq!(shapes[0]["radius"], json!(2.0));
    assert_eq!(shapes[1]["_type"], json!("Square"));
    assert_eq!(shapes[1]["side"], json!(3.0));
    // no discriminator match falls back to the declared type
    assert_eq!(shapes[2]["_type"], json!("Shape"));
}
