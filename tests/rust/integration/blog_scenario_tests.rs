//! The blog seed scenario end to end: three joined rows reduce to one
//! article with two comments and one shared author, and counting never
//! multiplies through the joins.

use crate::common::{row, FakeSource};
use rowgraph::exec::{query::find_by_id, Query};
use rowgraph::model::{ColumnType, ContainerKind, ModelRegistry, RecordType};
use rowgraph::sql::Dialect;
use serde::Deserialize;
use serde_json::json;

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

/// Article 1 by user 10, two comments: one by user 10, one by user 11.
fn blog_rows() -> Vec<rowgraph::Row> {
    let article = [
        ("article.id", json!(1)),
        ("article.title", json!("Hello")),
        ("article.content", json!("World")),
        ("author.id", json!(10)),
        ("author.firstName", json!("Ann")),
        ("author.lastName", json!("Author")),
    ];
    let mut first = article.to_vec();
    first.extend([
        ("comments.id", json!(100)),
        ("comments.article_id", json!(1)),
        ("comments.text", json!("nice")),
        ("comments.author.id", json!(10)),
        ("comments.author.firstName", json!("Ann")),
        ("comments.author.lastName", json!("Author")),
    ]);
    let mut second = article.to_vec();
    second.extend([
        ("comments.id", json!(101)),
        ("comments.article_id", json!(1)),
        ("comments.text", json!("thanks")),
        ("comments.author.id", json!(11)),
        ("comments.author.firstName", json!("Bob")),
        ("comments.author.lastName", json!("Reader")),
    ]);
    vec![row(&first), row(&second)]
}

#[test]
fn rows_reduce_to_one_article_with_shared_author() {
    let registry = blog_registry();
    let mut source = FakeSource::with_rows(blog_rows());
    let mut query = Query::build(&registry, "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    let articles = query.execute(&mut source).unwrap();

    assert_eq!(articles.len(), 1);
    let article = &articles[0];
    assert_eq!(article["title"], json!("Hello"));
    let comments = article["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 2);
    // the article author and the first comment's author are the same entity
    assert_eq!(article["author"], comments[0]["author"]);
    assert_eq!(article["author"]["firstName"], json!("Ann"));
    assert_eq!(comments[1]["author"]["firstName"], json!("Bob"));
}

#[derive(Debug, Deserialize, PartialEq)]
struct UserView {
    id: i64,
    #[serde(rename = "firstName")]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct ArticleView {
    id: i64,
    title: String,
    author: UserView,
    comments: Vec<CommentView>,
}

#[derive(Debug, Deserialize)]
struct CommentView {
    id: i64,
    text: String,
    author: UserView,
}

#[test]
fn typed_fetch_deserialises_the_graph() {
    let registry = blog_registry();
    let mut source = FakeSource::with_rows(blog_rows());
    let query = Query::build(&registry, "Article").unwrap();
    let articles: Vec<ArticleView> = query.fetch_as(&mut source).unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].id, 1);
    assert_eq!(articles[0].title, "Hello");
    assert_eq!(articles[0].comments.len(), 2);
    assert_eq!(articles[0].author, articles[0].comments[0].author);
    assert_eq!(articles[0].comments[1].id, 101);
    assert_eq!(articles[0].comments[1].text, "thanks");
}

#[test]
fn count_is_three_not_six() {
    // three articles with two comments each: the row set has six rows but
    // COUNT(DISTINCT root id) answers three
    let registry = blog_registry();
    let mut source = FakeSource::with_rows(vec![row(&[("count", json!(3))])]);
    let mut query = Query::build(&registry, "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    query.add_where("{article}.title LIKE ?", vec![json!("%")]);
    let count = query.count(&mut source).unwrap();
    assert_eq!(count, 3);
    assert!(source.statements[0]
        .sql
        .starts_with("SELECT COUNT(DISTINCT `article`.`id`)"));
}

#[test]
fn find_by_id_filters_on_the_root_id() {
    let registry = blog_registry();
    let mut source = FakeSource::with_rows(blog_rows());
    let found = find_by_id(&registry, "Article", json!(1), &mut source)
        .unwrap()
        .unwrap();
    assert_eq!(found["id"], json!(1));
    let sql = &source.statements[0].sql;
    assert!(sql.contains("WHERE"));
    assert!(sql.contains("article") && sql.contains("id = ?"));
    assert_eq!(source.statements[0].params, vec![json!(1)]);
}

#[test]
fn role_set_through_link_table_collapses_to_values() {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            RecordType::build("User")
                .table("user")
                .id("id", ColumnType::Long)
                .link_values(
                    "roles",
                    "user_roles",
                    "element",
                    ColumnType::Enum {
                        name: "Role".into(),
                        variants: vec!["ADMIN".into(), "AGENT".into()],
                    },
                    ContainerKind::Set,
                )
                .finish(),
        )
        .unwrap();
    let rows = vec![
        row(&[("user.id", json!(1)), ("roles.value", json!("ADMIN"))]),
        row(&[("user.id", json!(1)), ("roles.value", json!("AGENT"))]),
        // row multiplication repeats a link row; the set absorbs it
        row(&[("user.id", json!(1)), ("roles.value", json!("ADMIN"))]),
    ];
    let mut source = FakeSource::with_rows(rows);
    let mut query = Query::build(&registry, "User").unwrap();
    query.set_dialect(Dialect::MySql);
    let statement_sql = query.to_statement().unwrap().sql;
    assert!(statement_sql.contains("LEFT JOIN `user_roles` AS `user_roles`"));
    assert!(statement_sql.contains("`user_roles`.`element` AS `roles.value`"));

    let users = query.execute(&mut source).unwrap();
    assert_eq!(users.len(), 1);
    let roles: Vec<&str> = users[0]["roles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["ADMIN", "AGENT"]);
}

#[test]
fn two_phase_pagination_limits_roots_not_rows() {
    let registry = blog_registry();
    // phase one answers the id page, phase two the full graph
    let id_page = vec![row(&[("article.id", json!(1))])];
    let mut source = FakeSource::with_row_sets(vec![id_page, blog_rows()]);
    let mut query = Query::build(&registry, "Article").unwrap();
    query.set_dialect(Dialect::MySql);
    query.add_order_by("{article}.id");
    query.set_limit(1);
    let articles = query.execute_paged(&mut source).unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0]["comments"].as_array().unwrap().len(), 2);

    let first = &source.statements[0].sql;
    assert!(first.starts_with("SELECT DISTINCT `article`.`id`"));
    assert!(first.contains("LIMIT 1"));
    let second = &source.statements[1].sql;
    assert!(second.contains("`article`.id IN (?)"));
    assert!(!second.contains("LIMIT"));
}
