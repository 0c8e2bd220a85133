//! Loading the declarative model sidecar from disk and planning from it.

use rowgraph::model::config::ModelConfig;
use rowgraph::plan::build_query_plan;
use std::io::Write;

const BLOG_MODEL: &str = r#"
types:
  - name: Article
    table: article
    fields:
      - name: id
        type: long
        id: true
      - name: title
        type: varchar(255)
      - name: author
        to_one: User
      - name: comments
        to_many: Comment
  - name: Comment
    table: comment
    fields:
      - name: id
        type: long
        id: true
      - name: article_id
        type: long
      - name: text
        type: text
  - name: User
    table: user
    fields:
      - name: id
        type: long
        id: true
      - name: firstName
        type: varchar(100)
"#;

#[test]
fn yaml_file_round_trips_into_a_plan() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BLOG_MODEL.as_bytes()).unwrap();
    let config = ModelConfig::from_yaml_file(file.path()).unwrap();
    let registry = config.to_registry().unwrap();
    let plan = build_query_plan(&registry, "Article").unwrap();
    assert_eq!(plan.root_alias, "article");
    assert!(plan.projections.iter().any(|p| p.result_key == "comments.text"));
    assert!(plan.projections.iter().any(|p| p.result_key == "author.firstName"));
}

#[test]
fn missing_file_is_a_config_error() {
    let err = ModelConfig::from_yaml_file("/nonexistent/model.yaml").unwrap_err();
    assert!(err.to_string().contains("failed to read"));
}

#[test]
fn builder_and_yaml_produce_the_same_plan() {
    use rowgraph::model::{ColumnType, ModelRegistry, RecordType};

    let from_yaml = ModelConfig::from_yaml(BLOG_MODEL)
        .unwrap()
        .to_registry()
        .unwrap();

    let mut built = ModelRegistry::new();
    built
        .register(
            RecordType::build("Article")
                .table("article")
                .id("id", ColumnType::Long)
                .scalar("title", ColumnType::VarChar(255))
                .to_one("author", "User")
                .to_many("comments", "Comment")
                .finish(),
        )
        .unwrap();
    built
        .register(
            RecordType::build("Comment")
                .table("comment")
                .id("id", ColumnType::Long)
                .scalar("article_id", ColumnType::Long)
                .scalar("text", ColumnType::Text)
                .finish(),
        )
        .unwrap();
    built
        .register(
            RecordType::build("User")
                .table("user")
                .id("id", ColumnType::Long)
                .scalar("firstName", ColumnType::VarChar(100))
                .finish(),
        )
        .unwrap();

    let yaml_plan = build_query_plan(&from_yaml, "Article").unwrap();
    let built_plan = build_query_plan(&built, "Article").unwrap();
    assert_eq!(yaml_plan, built_plan);
}
