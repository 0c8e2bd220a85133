//! A scripted in-memory row source. `query` pops the next scripted row set,
//! `execute` pops the next scripted result; every statement is recorded for
//! assertions.

use rowgraph::exec::{ExecResult, RowSource, TransportError};
use rowgraph::reduce::Row;
use rowgraph::sql::Statement;
use serde_json::Value;

#[derive(Default)]
pub struct FakeSource {
    pub row_sets: Vec<Vec<Row>>,
    pub exec_results: Vec<ExecResult>,
    pub statements: Vec<Statement>,
    pub transactions: Vec<&'static str>,
}

impl FakeSource {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        FakeSource {
            row_sets: vec![rows],
            ..Default::default()
        }
    }

    pub fn with_row_sets(row_sets: Vec<Vec<Row>>) -> Self {
        FakeSource {
            row_sets,
            ..Default::default()
        }
    }

    pub fn with_exec_results(exec_results: Vec<ExecResult>) -> Self {
        FakeSource {
            exec_results,
            ..Default::default()
        }
    }
}

impl RowSource for FakeSource {
    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, TransportError> {
        self.statements.push(statement.clone());
        if self.row_sets.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(self.row_sets.remove(0))
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<ExecResult, TransportError> {
        self.statements.push(statement.clone());
        if self.exec_results.is_empty() {
            Ok(ExecResult::default())
        } else {
            Ok(self.exec_results.remove(0))
        }
    }

    fn begin(&mut self) -> Result<(), TransportError> {
        self.transactions.push("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        self.transactions.push("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TransportError> {
        self.transactions.push("rollback");
        Ok(())
    }
}

/// Build a row from `(key, value)` pairs.
pub fn row(cells: &[(&str, Value)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
