//! Passive mapping registry consumed by the generic DAO.
//!
//! # Responsibility
//! - Describe how an entity type is laid out in SQLite: identity and version
//!   columns, joined variant tables, discriminator, owner back-reference,
//!   owned relationships and the query-by-example field table.
//! - Validate identifiers before any SQL is generated from them.
//! - Check a live connection actually carries the mapped tables/columns.
//!
//! # Invariants
//! - Joined tables share the root's identity column name.
//! - Column lists exclude the identity and version columns.
//! - Entities return column values in exactly the declared column order.

pub mod wildcard;

use crate::dao::{DaoError, DaoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// One physical table and the mapped columns it contributes.
#[derive(Debug)]
pub struct TableMapping {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

impl TableMapping {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|candidate| *candidate == column)
    }
}

/// Variant tag stored in a root column.
#[derive(Debug)]
pub struct Discriminator {
    pub column: &'static str,
    /// `None` for the polymorphic root mapping, `Some(tag)` for a variant.
    pub value: Option<&'static str>,
}

/// Non-owning back-reference column on a child entity.
#[derive(Debug)]
pub struct OwnerReference {
    pub column: &'static str,
    pub owner_entity: &'static str,
    pub nullable: bool,
}

/// What happens to owned rows when the owner is saved or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    /// Children must be persisted on their own; deleting a parent that still
    /// has children is a constraint violation.
    None,
    /// Children are saved and deleted together with the owner.
    All,
}

/// Owner-to-children relationship.
#[derive(Debug)]
pub struct Relationship {
    pub name: &'static str,
    pub child: &'static EntityMapping,
    /// Back-reference column in the child's root table.
    pub owner_column: &'static str,
    pub cascade: Cascade,
    /// Delete persisted children that are no longer in the owner's set.
    pub orphan_removal: bool,
}

/// How a query-by-example field compares against the template value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Plain equality.
    Exact,
    /// Text pattern, see [`wildcard`].
    Wildcard,
}

/// One row of an entity's query-by-example table.
#[derive(Debug)]
pub struct ExampleField {
    pub table: &'static str,
    pub column: &'static str,
    pub matcher: Matcher,
}

/// Complete mapping of one registered entity type (or variant).
#[derive(Debug)]
pub struct EntityMapping {
    /// Registered entity name, used in errors and logs.
    pub entity: &'static str,
    pub root: TableMapping,
    pub id_column: &'static str,
    pub version_column: &'static str,
    pub discriminator: Option<Discriminator>,
    /// Variant tables joined on the identity column.
    pub joined: &'static [TableMapping],
    pub owner: Option<OwnerReference>,
    pub relationships: &'static [Relationship],
    pub example_fields: &'static [ExampleField],
}

impl EntityMapping {
    /// Returns the root table followed by all joined tables.
    pub fn tables(&self) -> impl Iterator<Item = &TableMapping> {
        std::iter::once(&self.root).chain(self.joined.iter())
    }

    pub fn table(&self, name: &str) -> Option<&TableMapping> {
        self.tables().find(|table| table.name == name)
    }

    /// Variant tag this mapping is restricted to, if any.
    pub fn variant(&self) -> Option<&'static str> {
        self.discriminator
            .as_ref()
            .and_then(|discriminator| discriminator.value)
    }

    /// Checks identifiers and internal references of this mapping.
    pub fn validate(&self) -> DaoResult<()> {
        for table in self.tables() {
            check_identifier(self, table.name)?;
            for column in table.columns {
                check_identifier(self, column)?;
            }
        }
        check_identifier(self, self.id_column)?;
        check_identifier(self, self.version_column)?;

        if let Some(discriminator) = &self.discriminator {
            self.require_root_column(discriminator.column)?;
        }
        if let Some(owner) = &self.owner {
            self.require_root_column(owner.column)?;
        }
        for relationship in self.relationships {
            if relationship.child.root.column_index(relationship.owner_column).is_none() {
                return Err(DaoError::Mapping(format!(
                    "{}.{}: owner column `{}` is not mapped by {}",
                    self.entity,
                    relationship.name,
                    relationship.owner_column,
                    relationship.child.entity
                )));
            }
            relationship.child.validate()?;
        }
        for field in self.example_fields {
            let mapped = self
                .table(field.table)
                .and_then(|table| table.column_index(field.column));
            if mapped.is_none() {
                return Err(DaoError::Mapping(format!(
                    "{}: example field `{}.{}` is not a mapped column",
                    self.entity, field.table, field.column
                )));
            }
        }
        Ok(())
    }

    /// Verifies the connection's schema has every mapped table and column.
    pub fn ensure_ready(&self, conn: &Connection) -> DaoResult<()> {
        for table in self.tables() {
            let existing = table_columns(conn, table.name)?;
            if existing.is_empty() {
                return Err(DaoError::Mapping(format!(
                    "{}: table `{}` does not exist",
                    self.entity, table.name
                )));
            }
            let mut required = vec![self.id_column];
            if table.name == self.root.name {
                required.push(self.version_column);
            }
            required.extend(table.columns.iter().copied());
            if let Some(missing) = required
                .into_iter()
                .find(|column| !existing.iter().any(|name| name == column))
            {
                return Err(DaoError::Mapping(format!(
                    "{}: column `{missing}` missing from table `{}`",
                    self.entity, table.name
                )));
            }
        }
        for relationship in self.relationships {
            relationship.child.ensure_ready(conn)?;
        }
        Ok(())
    }

    fn require_root_column(&self, column: &str) -> DaoResult<()> {
        match self.root.column_index(column) {
            Some(_) => Ok(()),
            None => Err(DaoError::Mapping(format!(
                "{}: column `{column}` must be mapped on root table `{}`",
                self.entity, self.root.name
            ))),
        }
    }
}

pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

fn check_identifier(mapping: &EntityMapping, value: &str) -> DaoResult<()> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(DaoError::Mapping(format!(
            "{}: `{value}` is not a valid SQL identifier",
            mapping.entity
        )))
    }
}

fn table_columns(conn: &Connection, table: &str) -> DaoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    static BROKEN_TABLE: EntityMapping = EntityMapping {
        entity: "Broken",
        root: TableMapping {
            name: "bad table",
            columns: &["label"],
        },
        id_column: "id",
        version_column: "version",
        discriminator: None,
        joined: &[],
        owner: None,
        relationships: &[],
        example_fields: &[],
    };

    static UNMAPPED_EXAMPLE: EntityMapping = EntityMapping {
        entity: "Unmapped",
        root: TableMapping {
            name: "things",
            columns: &["label"],
        },
        id_column: "id",
        version_column: "version",
        discriminator: None,
        joined: &[],
        owner: None,
        relationships: &[],
        example_fields: &[ExampleField {
            table: "things",
            column: "colour",
            matcher: Matcher::Exact,
        }],
    };

    #[test]
    fn identifier_pattern_rejects_sql_fragments() {
        assert!(is_valid_identifier("personal_addresses"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier("1x"));
        assert!(!is_valid_identifier("name; DROP TABLE addresses"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn validate_rejects_invalid_table_name() {
        let err = BROKEN_TABLE.validate().unwrap_err();
        assert!(matches!(err, DaoError::Mapping(message) if message.contains("bad table")));
    }

    #[test]
    fn validate_rejects_unmapped_example_field() {
        let err = UNMAPPED_EXAMPLE.validate().unwrap_err();
        assert!(matches!(err, DaoError::Mapping(message) if message.contains("things.colour")));
    }

    #[test]
    fn ensure_ready_reports_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        let err = UNMAPPED_EXAMPLE.ensure_ready(&conn).unwrap_err();
        assert!(matches!(err, DaoError::Mapping(message) if message.contains("does not exist")));
    }

    #[test]
    fn ensure_ready_reports_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE things (id INTEGER PRIMARY KEY, label TEXT);")
            .unwrap();
        let err = UNMAPPED_EXAMPLE.ensure_ready(&conn).unwrap_err();
        assert!(matches!(err, DaoError::Mapping(message) if message.contains("`version`")));
    }
}
