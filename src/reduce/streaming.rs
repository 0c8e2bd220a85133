//! Streaming reduction.
//!
//! Same state machine as the eager reducer, but each root entity is handed
//! to the consumer as soon as its row group closes (the root identity on the
//! current row differs from the previous row's). Soundness requires the row
//! stream to be grouped by root identity; the driver verifies this and
//! fails when a closed root reappears.

use serde_json::Value;

use crate::reduce::errors::MappingError;
use crate::reduce::{Reduction, Row};
use crate::plan::QueryPlan;

/// Drive a grouped row stream into `consumer`. Returns the number of roots
/// emitted. The consumer sees each root exactly once, complete; an error
/// (from a row, from reduction, or from the consumer itself) propagates
/// immediately and no partial root is ever delivered.
pub fn stream_rows<I, E, F>(
    plan: &QueryPlan,
    rows: I,
    mut consumer: F,
) -> Result<u64, E>
where
    I: IntoIterator<Item = Result<Row, E>>,
    E: From<MappingError>,
    F: FnMut(Value) -> Result<(), E>,
{
    let mut reduction = Reduction::new(plan);
    let mut current: Option<(usize, String)> = None;
    let mut closed: Vec<String> = Vec::new();
    let mut emitted = 0u64;

    for row in rows {
        let row = row?;
        let Some((slot, identity)) = reduction.process_row(&row)? else {
            continue;
        };
        match &current {
            Some((current_slot, current_identity)) if *current_identity == identity => {
                debug_assert_eq!(*current_slot, slot);
            }
            Some((current_slot, current_identity)) => {
                consumer(reduction.materialize(*current_slot))?;
                emitted += 1;
                closed.push(current_identity.clone());
                if closed.contains(&identity) {
                    return Err(MappingError::UngroupedRows { root_id: identity }.into());
                }
                current = Some((slot, identity));
            }
            None => {
                if closed.contains(&identity) {
                    return Err(MappingError::UngroupedRows { root_id: identity }.into());
                }
                current = Some((slot, identity));
            }
        }
    }

    if let Some((slot, _)) = current {
        consumer(reduction.materialize(slot))?;
        emitted += 1;
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, ModelRegistry, RecordType};
    use crate::plan::build_query_plan;
    use crate::reduce::reduce_rows;
    use serde_json::json;

    fn plan() -> (ModelRegistry, QueryPlan) {
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
        let plan = build_query_plan(&registry, "Author").unwrap();
        (registry, plan)
    }

    fn rows() -> Vec<Row> {
        let cells = [
            (1, "ann", 11, 1999),
            (1, "ann", 12, 2004),
            (2, "bob", 21, 2011),
        ];
        cells
            .iter()
            .map(|(id, name, book, year)| {
                let mut row = Row::new();
                row.insert("author.id".into(), json!(id));
                row.insert("author.name".into(), json!(name));
                row.insert("books.id".into(), json!(book));
                row.insert("books.year".into(), json!(year));
                row
            })
            .collect()
    }

    #[test]
    fn streaming_matches_eager_reduction() {
        let (_registry, plan) = plan();
        let eager = reduce_rows(&plan, rows()).unwrap();
        let mut streamed = Vec::new();
        let emitted = stream_rows::<_, MappingError, _>(
            &plan,
            rows().into_iter().map(Ok),
            |root| {
                streamed.push(root);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(streamed, eager);
    }

    #[test]
    fn regrouped_root_is_rejected() {
        let (_registry, plan) = plan();
        let mut shuffled = rows();
        shuffled.swap(1, 2); // ann, bob, ann: ann's group reopens
        let err = stream_rows::<_, MappingError, _>(
            &plan,
            shuffled.into_iter().map(Ok),
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::UngroupedRows { .. }));
    }

    #[test]
    fn row_error_propagates_before_emission() {
        let (_registry, plan) = plan();
        let stream = vec![
            Ok(rows().remove(0)),
            Err(MappingError::MissingParent {
                alias: "simulated transport failure".into(),
            }),
        ];
        let mut seen = 0;
        let err = stream_rows::<_, MappingError, _>(&plan, stream, |_| {
            seen += 1;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, MappingError::MissingParent { .. }));
        // the first root's group never closed, so nothing was emitted
        assert_eq!(seen, 0);
    }
}
