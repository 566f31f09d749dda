//! Row materializers over any connection.

use crate::connection::Connection;
use crate::error::{DbResult, Error};
use crate::value::Value;

/// One materialized row, in column order.
pub type Row = Vec<Value>;

/// Run a query and materialize the first row.
///
/// An empty result is a NotFound failure with message "No rows returned".
pub fn query_one(conn: &mut dyn Connection, sql: &str) -> DbResult<Row> {
    let mut rs = conn.query(sql)?;
    if !rs.next() {
        return Err(Error::not_found("No rows returned"));
    }

    let count = rs.column_names().len();
    let mut row = Row::with_capacity(count);
    for i in 0..count {
        row.push(rs.get(i));
    }
    Ok(row)
}

/// Run a query and drain every row. An empty result is `Ok(vec![])`.
pub fn query_all(conn: &mut dyn Connection, sql: &str) -> DbResult<Vec<Row>> {
    let mut rs = conn.query(sql)?;
    let count = rs.column_names().len();

    let mut rows = Vec::new();
    while rs.next() {
        let mut row = Row::with_capacity(count);
        for i in 0..count {
            row.push(rs.get(i));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ResultSet;

    struct VecResultSet {
        cols: Vec<String>,
        rows: Vec<Row>,
        cursor: Option<usize>,
    }

    impl ResultSet for VecResultSet {
        fn next(&mut self) -> bool {
            let next = self.cursor.map_or(0, |c| c + 1);
            if next < self.rows.len() {
                self.cursor = Some(next);
                true
            } else {
                self.cursor = Some(self.rows.len());
                false
            }
        }

        fn get(&self, index: usize) -> Value {
            let row = match self.cursor.and_then(|c| self.rows.get(c)) {
                Some(row) => row,
                None => return Value::Null,
            };
            row.get(index).cloned().unwrap_or(Value::Null)
        }

        fn get_named(&self, name: &str) -> Value {
            match self.cols.iter().position(|c| c == name) {
                Some(i) => self.get(i),
                None => Value::Null,
            }
        }

        fn column_names(&self) -> &[String] {
            &self.cols
        }
    }

    #[derive(Debug)]
    struct VecConnection {
        rows: Vec<Row>,
    }

    impl Connection for VecConnection {
        fn open(&mut self) -> DbResult<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }

        fn query(&mut self, _sql: &str) -> DbResult<Box<dyn ResultSet + '_>> {
            Ok(Box::new(VecResultSet {
                cols: vec!["id".to_string(), "name".to_string()],
                rows: self.rows.clone(),
                cursor: None,
            }))
        }

        fn execute(&mut self, _sql: &str) -> DbResult<u64> {
            Ok(0)
        }

        fn execute_params(&mut self, _sql: &str, _params: &[Value]) -> DbResult<u64> {
            Ok(0)
        }

        fn begin(&mut self) -> DbResult<()> {
            Ok(())
        }

        fn commit(&mut self) -> DbResult<()> {
            Ok(())
        }

        fn rollback(&mut self) -> DbResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_query_one_returns_first_row() {
        let mut conn = VecConnection {
            rows: vec![
                vec![Value::Int(1), Value::Text("a".into())],
                vec![Value::Int(2), Value::Text("b".into())],
            ],
        };
        let row = query_one(&mut conn, "SELECT id, name FROM t").unwrap();
        assert_eq!(row, vec![Value::Int(1), Value::Text("a".into())]);
    }

    #[test]
    fn test_query_one_empty_is_not_found() {
        let mut conn = VecConnection { rows: vec![] };
        let err = query_one(&mut conn, "SELECT id, name FROM t").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert_eq!(err.message(), "No rows returned");
    }

    #[test]
    fn test_query_all_drains() {
        let mut conn = VecConnection {
            rows: vec![
                vec![Value::Int(1), Value::Null],
                vec![Value::Int(2), Value::Text("b".into())],
            ],
        };
        let rows = query_all(&mut conn, "SELECT id, name FROM t").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Value::Text("b".into()));
    }

    #[test]
    fn test_query_all_empty_is_ok() {
        let mut conn = VecConnection { rows: vec![] };
        let rows = query_all(&mut conn, "SELECT id, name FROM t").unwrap();
        assert!(rows.is_empty());
    }
}
