//! Unit test harness: statement-level tests that never touch a row source.

mod blog_sql_tests;
mod default_dialect_tests;
mod yaml_model_tests;
