//! Pass-through SQL execution for `Dao::find`.
//!
//! # Invariants
//! - Only named placeholders (`:name`, `@name`, `$name`) are accepted; every
//!   placeholder must be bound and every supplied name must be used.
//! - Transaction control statements are rejected; the handle owns them.
//!   Leading comments do not hide one, and a statement that still changes
//!   the transaction state is reported as an error.
//! - Writing statements go through the savepoint-scoped write path.

use super::session::{self, Session, SharedState};
use super::{DaoError, DaoResult, Value};
use log::error;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params_from_iter, CachedStatement};
use std::collections::{BTreeMap, BTreeSet};

static TRANSACTION_CONTROL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:\s|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/)*(BEGIN|COMMIT|END|ROLLBACK|SAVEPOINT|RELEASE)\b",
    )
    .expect("valid transaction control regex")
});

/// Named parameters for [`crate::dao::Dao::find_with_params`]; keys may carry
/// or omit the `:`/`@`/`$` prefix.
pub type QueryParams = BTreeMap<String, Value>;

/// One result row of a pass-through query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl QueryRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Executes `query` on the shared session of `state`.
pub(crate) fn find(state: &SharedState, query: &str, params: &QueryParams) -> DaoResult<Vec<QueryRow>> {
    if TRANSACTION_CONTROL_RE.is_match(query) {
        return Err(DaoError::QuerySyntax(
            "transaction control statements are reserved for commit/rollback".to_string(),
        ));
    }

    let read_only = session::read(state, |session| Ok(prepare(session, query)?.readonly()))?;
    if read_only {
        session::read(state, |session| run(session, query, params))
    } else {
        session::write(state, |session| run(session, query, params))
    }
}

fn prepare<'c>(session: &Session<'c>, query: &str) -> DaoResult<CachedStatement<'c>> {
    if query.trim().is_empty() {
        return Err(DaoError::QuerySyntax("query text is empty".to_string()));
    }
    session
        .conn()
        .prepare_cached(query)
        .map_err(|err| DaoError::QuerySyntax(err.to_string()))
}

fn run(session: &Session<'_>, query: &str, params: &QueryParams) -> DaoResult<Vec<QueryRow>> {
    let conn = session.conn();
    let was_autocommit = conn.is_autocommit();
    let rows = collect_rows(session, query, params)?;
    if conn.is_autocommit() == was_autocommit {
        return Ok(rows);
    }

    error!(
        "event=dao_find module=dao status=error session={} error_kind=transaction_control was_autocommit={was_autocommit}",
        session.id()
    );
    if was_autocommit {
        conn.execute_batch("ROLLBACK;")?;
    }
    Err(DaoError::QuerySyntax(
        "query changed the transaction state; use commit/rollback".to_string(),
    ))
}

fn collect_rows(
    session: &Session<'_>,
    query: &str,
    params: &QueryParams,
) -> DaoResult<Vec<QueryRow>> {
    let mut stmt = prepare(session, query)?;
    let bound = bind_in_order(&stmt, params)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.query(params_from_iter(bound))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|index| row.get::<_, Value>(index))
            .collect::<Result<Vec<_>, _>>()?;
        result.push(QueryRow {
            columns: columns.clone(),
            values,
        });
    }
    Ok(result)
}

/// Orders the caller's values by the statement's parameter indexes.
fn bind_in_order<'p>(
    stmt: &CachedStatement<'_>,
    params: &'p QueryParams,
) -> DaoResult<Vec<&'p Value>> {
    let mut supplied: BTreeMap<&str, &'p Value> = BTreeMap::new();
    for (key, value) in params {
        let name = strip_prefix(key);
        if name.is_empty() {
            return Err(DaoError::ParameterBinding(format!(
                "`{key}` is not a parameter name"
            )));
        }
        if supplied.insert(name, value).is_some() {
            return Err(DaoError::ParameterBinding(format!(
                "parameter `{name}` supplied more than once"
            )));
        }
    }

    let mut used = BTreeSet::new();
    let mut ordered = Vec::with_capacity(stmt.parameter_count());
    for index in 1..=stmt.parameter_count() {
        let placeholder = match stmt.parameter_name(index) {
            Some(placeholder) if !placeholder.starts_with('?') => placeholder,
            _ => {
                return Err(DaoError::ParameterBinding(format!(
                    "parameter {index} is positional; use named parameters"
                )))
            }
        };
        let name = strip_prefix(placeholder);
        let Some(value) = supplied.get(name) else {
            return Err(DaoError::ParameterBinding(format!(
                "no value supplied for `{placeholder}`"
            )));
        };
        used.insert(name);
        ordered.push(*value);
    }

    if let Some(extra) = supplied.keys().find(|name| !used.contains(*name)) {
        return Err(DaoError::ParameterBinding(format!(
            "parameter `{extra}` is not used by the query"
        )));
    }
    Ok(ordered)
}

fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(&[':', '@', '$'][..]).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::super::session::HandleState;
    use super::*;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    #[test]
    fn prefixes_are_stripped_once() {
        assert_eq!(strip_prefix(":nick"), "nick");
        assert_eq!(strip_prefix("@nick"), "nick");
        assert_eq!(strip_prefix("$nick"), "nick");
        assert_eq!(strip_prefix("nick"), "nick");
        assert_eq!(strip_prefix("::nick"), ":nick");
    }

    #[test]
    fn transaction_control_is_detected_case_insensitively() {
        assert!(TRANSACTION_CONTROL_RE.is_match("commit"));
        assert!(TRANSACTION_CONTROL_RE.is_match("  Rollback TO x"));
        assert!(TRANSACTION_CONTROL_RE.is_match("BEGIN IMMEDIATE"));
        assert!(TRANSACTION_CONTROL_RE.is_match("/* x */ COMMIT"));
        assert!(TRANSACTION_CONTROL_RE.is_match("/* a\n b */\n/**/end"));
        assert!(TRANSACTION_CONTROL_RE.is_match("-- note\nROLLBACK"));
        assert!(!TRANSACTION_CONTROL_RE.is_match("-- COMMIT\nSELECT 1"));
        assert!(!TRANSACTION_CONTROL_RE.is_match("/* ROLLBACK */ SELECT 1"));
        assert!(!TRANSACTION_CONTROL_RE.is_match("SELECT 'commit'"));
        assert!(!TRANSACTION_CONTROL_RE.is_match("SELECT * FROM beginnings"));
    }

    #[test]
    fn statement_that_opens_a_transaction_is_undone_and_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let state: SharedState = Arc::new(Mutex::new(HandleState::new(conn)));

        let err = session::read(&state, |session| run(session, "BEGIN", &QueryParams::new()))
            .unwrap_err();
        assert!(matches!(err, DaoError::QuerySyntax(message) if message.contains("transaction state")));
        assert!(!session::lock(&state)
            .unwrap()
            .has_pending_transaction()
            .unwrap());
    }

    #[test]
    fn query_row_looks_up_by_column_name() {
        let row = QueryRow {
            columns: vec!["id".to_string(), "nickname".to_string()],
            values: vec![Value::Integer(3), Value::Text("Lups".to_string())],
        };
        assert_eq!(row.get("nickname"), Some(&Value::Text("Lups".to_string())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
    }
}
