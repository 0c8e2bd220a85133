//! Integration harness: end-to-end scenarios over an in-memory row source.

mod common;

mod blog_scenario_tests;
mod mutation_tests;
mod streaming_tests;
mod subclass_tests;
