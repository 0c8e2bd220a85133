//! The blog scenario at the statement level: aliases, projections, joins,
//! count and id-list plans.

use rowgraph::exec::Query;
use rowgraph::model::{ColumnType, ModelRegistry, RecordType};
use rowgraph::plan::build_query_plan;
use rowgraph::sql::Dialect;
use serde_json::json;
use std::collections::HashSet;

fn blog_registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("User")
                .table("user")
                .id("id", ColumnType::Long)
                .scalar("firstName", ColumnType::VarChar(100))
                .scalar("lastName", ColumnType::VarChar(100))
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Comment")
                .table("comment")
                .id("id", ColumnType::Long)
                .scalar("article_id", ColumnType::Long)
                .scalar("text", ColumnType::Text)
                .to_one("author", "User")
                .finish(),
        )
        .unwrap();
    registry
        .register(
            RecordType::build("Article")
                .table("article")
                .id("id", ColumnType::Long)
                .scalar("title", ColumnType::VarChar(255))
                .scalar("content", ColumnType::Text)
                .to_one("author", "User")
                .to_many("comments", "Comment")
                .finish(),
        )
        .unwrap();
    registry
}

#[test]
fn blog_select_matches_expected_shape() {
    let mut query = Query::build(&blog_registry(), "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    let statement = query.to_statement().unwrap();
    let expected = "\
SELECT `article`.`id` AS `article.id`, `article`.`title` AS `article.title`, \
`article`.`content` AS `article.content`, `author`.`id` AS `author.id`, \
`author`.`firstName` AS `author.firstName`, `author`.`lastName` AS `author.lastName`, \
`comments`.`id` AS `comments.id`, `comments`.`article_id` AS `comments.article_id`, \
`comments`.`text` AS `comments.text`, `comments.author`.`id` AS `comments.author.id`, \
`comments.author`.`firstName` AS `comments.author.firstName`, \
`comments.author`.`lastName` AS `comments.author.lastName`
FROM `article`
LEFT JOIN `user` AS `author` ON `article`.`author_id` = `author`.`id`
LEFT JOIN `comment` AS `comments` ON `article`.`id` = `comments`.`article_id`
LEFT JOIN `user` AS `comments.author` ON `comments`.`author_id` = `comments.author`.`id`";
    assert_eq!(statement.sql, expected);
    assert!(statement.params.is_empty());
}

#[test]
fn projected_keys_are_exactly_the_alias_fields_with_no_duplicates() {
    let plan = build_query_plan(&blog_registry(), "Article").unwrap();
    let mut seen = HashSet::new();
    for projection in &plan.projections {
        // every key is "<alias>.<field>" for a known alias
        let (alias, field) = projection.result_key.rsplit_once('.').unwrap();
        assert!(plan.alias(alias).is_some(), "unknown alias in {}", projection.result_key);
        assert!(!field.is_empty());
        assert!(
            seen.insert(projection.result_key.clone()),
            "duplicate projection {}",
            projection.result_key
        );
    }
}

#[test]
fn statement_build_is_deterministic_and_idempotent() {
    let registry = blog_registry();
    let mut first = Query::build(&registry, "Article").unwrap();
    first.set_dialect(Dialect::MySql);
    first.add_where("{article}.title = ?", vec![json!("t")]);
    let mut second = Query::build(&registry, "Article").unwrap();
    second.set_dialect(Dialect::MySql);
    second.add_where("{article}.title = ?", vec![json!("t")]);
    assert_eq!(
        first.to_statement().unwrap(),
        second.to_statement().unwrap()
    );
    // building twice from the same query does not re-substitute anything
    assert_eq!(
        first.to_statement().unwrap(),
        first.to_statement().unwrap()
    );
}

#[test]
fn count_statement_ignores_order_and_limit() {
    let mut query = Query::build(&blog_registry(), "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    query.add_where("{article}.title LIKE ?", vec![json!("a%")]);
    query.add_order_by("{article}.title");
    query.set_limit(5);
    let statement = query.to_count_statement().unwrap();
    assert!(statement
        .sql
        .starts_with("SELECT COUNT(DISTINCT `article`.`id`) AS `count`"));
    assert!(!statement.sql.contains("ORDER BY"));
    assert!(!statement.sql.contains("LIMIT"));
    assert_eq!(statement.params, vec![json!("a%")]);
}

#[test]
fn ids_statement_keeps_order_and_limit() {
    let mut query = Query::build(&blog_registry(), "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    query.add_order_by("{article}.id");
    query.set_limit_offset(10, 5);
    let statement = query.to_ids_statement().unwrap();
    assert!(statement
        .sql
        .starts_with("SELECT DISTINCT `article`.`id` AS `article.id`"));
    assert!(statement.sql.contains("ORDER BY `article`.id"));
    assert!(statement.sql.ends_with("LIMIT 5 OFFSET 10"));
}

#[test]
fn sibling_relations_to_the_same_type_get_distinct_aliases() {
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
        .register(
            RecordType::build("Task")
                .table("task")
                .id("id", ColumnType::Long)
                .to_one("owner", "User")
                .to_one("reviewer", "User")
                .finish(),
        )
        .unwrap();
    let plan = build_query_plan(&registry, "Task").unwrap();
    assert!(plan.alias("owner").is_some());
    assert!(plan.alias("reviewer").is_some());
    assert!(plan
        .projections
        .iter()
        .any(|p| p.result_key == "owner.id"));
    assert!(plan
        .projections
        .iter()
        .any(|p| p.result_key == "reviewer.id"));
}
