//! SQL derived from entity mappings: mapped selects, insert/update with
//! version checks, cascading deletes and owned-collection sync.

use super::session::Session;
use super::{column_alias, DaoError, DaoResult, Entity, EntityId, MappedRow, Value, Version};
use crate::schema::wildcard;
use crate::schema::{Cascade, EntityMapping, Matcher, Relationship, TableMapping};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Upper bound of identities bound into one `IN (...)` list.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Mapped `SELECT` with accumulated filters and bind values.
pub(crate) struct Select {
    mapping: &'static EntityMapping,
    sql: String,
    bind_values: Vec<Value>,
}

impl Select {
    /// All rows visible to `mapping`, including its discriminator filter.
    pub(crate) fn for_mapping(mapping: &'static EntityMapping) -> Self {
        let root = mapping.root.name;
        let id = mapping.id_column;

        let mut columns = vec![
            aliased(root, id),
            aliased(root, mapping.version_column),
        ];
        columns.extend(mapping.root.columns.iter().map(|column| aliased(root, column)));
        for table in mapping.joined {
            columns.push(aliased(table.name, id));
            columns.extend(table.columns.iter().map(|column| aliased(table.name, column)));
        }

        let mut sql = format!("SELECT {} FROM {root}", columns.join(", "));
        for table in mapping.joined {
            let joined = table.name;
            sql.push_str(&format!(
                " LEFT JOIN {joined} ON {joined}.{id} = {root}.{id}"
            ));
        }
        sql.push_str(" WHERE 1 = 1");

        let mut select = Self {
            mapping,
            sql,
            bind_values: Vec::new(),
        };
        if let Some((column, tag)) = discriminator_filter(mapping) {
            select.and(format!("{root}.{column} = ?"), Value::Text(tag.to_string()));
        }
        select
    }

    pub(crate) fn and(&mut self, condition: String, value: Value) -> &mut Self {
        self.sql.push_str(" AND ");
        self.sql.push_str(&condition);
        self.bind_values.push(value);
        self
    }

    pub(crate) fn by_id(mut self, id: EntityId) -> Self {
        let condition = format!("{}.{} = ?", self.mapping.root.name, self.mapping.id_column);
        self.and(condition, Value::Integer(id));
        self
    }

    /// Runs the select ordered by identity and materializes children.
    pub(crate) fn fetch<E: Entity>(self, session: &Session<'_>) -> DaoResult<Vec<E>> {
        let sql = format!(
            "{} ORDER BY {}.{} ASC",
            self.sql, self.mapping.root.name, self.mapping.id_column
        );
        let mut entities = {
            let mut stmt = session.conn().prepare_cached(&sql)?;
            let mut rows = stmt.query(params_from_iter(self.bind_values.iter()))?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next()? {
                entities.push(E::from_row(&MappedRow::new(row, self.mapping))?);
            }
            entities
        };
        for entity in &mut entities {
            entity.load_children(session)?;
        }
        Ok(entities)
    }
}

pub(crate) fn fetch_by_id<E: Entity>(
    session: &Session<'_>,
    mapping: &'static EntityMapping,
    id: EntityId,
) -> DaoResult<Option<E>> {
    let mut found = Select::for_mapping(mapping).by_id(id).fetch(session)?;
    Ok(found.pop())
}

/// Builds the select for a query-by-example template.
///
/// Only fields listed in the mapping's example table participate; `NULL`
/// and empty text count as "unset". Wildcard fields follow
/// [`crate::schema::wildcard`].
pub(crate) fn example_select<E: Entity>(
    mapping: &'static EntityMapping,
    template: &E,
) -> DaoResult<Select> {
    let mut select = Select::for_mapping(mapping);
    for field in mapping.example_fields {
        let Some(index) = mapping
            .table(field.table)
            .and_then(|table| table.column_index(field.column))
        else {
            return Err(DaoError::Mapping(format!(
                "{}: example field `{}.{}` is not mapped",
                mapping.entity, field.table, field.column
            )));
        };
        let Some(value) = template
            .column_values(field.table)
            .and_then(|mut values| (index < values.len()).then(|| values.swap_remove(index)))
        else {
            continue;
        };

        let column = format!("{}.{}", field.table, field.column);
        match (value, field.matcher) {
            (Value::Null, _) => {}
            (Value::Text(text), _) if text.is_empty() => {}
            (Value::Text(text), Matcher::Wildcard) => {
                let pattern = wildcard::parse(&text);
                let condition = format!("{column} {} ?", pattern.operator());
                select.and(condition, Value::Text(pattern.into_value()));
            }
            (other, _) => {
                select.and(format!("{column} = ?"), other);
            }
        }
    }
    Ok(select)
}

/// Inserts or updates `entity` (and, through its hooks, its children).
pub(crate) fn save<E: Entity>(
    session: &Session<'_>,
    mapping: &'static EntityMapping,
    entity: &mut E,
) -> DaoResult<EntityId> {
    let conn = session.conn();
    let root_values = table_values(mapping, &mapping.root, entity)?.ok_or_else(|| {
        DaoError::Mapping(format!(
            "{}: entity provides no values for root table `{}`",
            mapping.entity, mapping.root.name
        ))
    })?;
    check_variant(mapping, &root_values)?;
    check_owner(mapping, &root_values)?;

    let (id, version) = match entity.id() {
        None => (insert_root(conn, mapping, root_values)?, 0),
        Some(id) => {
            let expected = entity.version().ok_or_else(|| {
                DaoError::InvalidData(format!(
                    "{} {id} carries an identity without a version",
                    mapping.entity
                ))
            })?;
            update_root(conn, mapping, id, expected, root_values)?;
            (id, expected + 1)
        }
    };

    for table in mapping.joined {
        match table_values(mapping, table, entity)? {
            Some(values) => upsert_joined(conn, mapping, table, id, values)?,
            None => {
                conn.execute(
                    &format!("DELETE FROM {} WHERE {} = ?1;", table.name, mapping.id_column),
                    [id],
                )?;
            }
        }
    }

    entity.mark_persisted(id, version);
    entity.save_children(session)?;
    Ok(id)
}

/// Deletes one persisted entity and everything it owns.
pub(crate) fn delete<E: Entity>(
    session: &Session<'_>,
    mapping: &'static EntityMapping,
    entity: &E,
) -> DaoResult<()> {
    let conn = session.conn();
    let id = entity.id().ok_or(DaoError::NotFound {
        entity: mapping.entity,
        id: None,
    })?;
    let actual = stored_version(conn, mapping, id)?.ok_or(DaoError::NotFound {
        entity: mapping.entity,
        id: Some(id),
    })?;
    if let Some(expected) = entity.version() {
        if expected != actual {
            return Err(DaoError::StaleVersion {
                entity: mapping.entity,
                id,
                expected,
                actual,
            });
        }
    }
    delete_rows(conn, mapping, &[id])?;
    Ok(())
}

/// Deletes every entity visible to `mapping`; returns how many.
pub(crate) fn delete_all(session: &Session<'_>, mapping: &'static EntityMapping) -> DaoResult<usize> {
    let mut sql = format!("SELECT {} FROM {}", mapping.id_column, mapping.root.name);
    let mut bind_values = Vec::new();
    if let Some((column, tag)) = discriminator_filter(mapping) {
        sql.push_str(&format!(" WHERE {column} = ?"));
        bind_values.push(Value::Text(tag.to_string()));
    }
    let ids = select_ids(session.conn(), &sql, bind_values)?;
    delete_rows(session.conn(), mapping, &ids)
}

pub(crate) fn load_owned<C: Entity>(
    session: &Session<'_>,
    relationship: &Relationship,
    owner: EntityId,
) -> DaoResult<Vec<C>> {
    let child = relationship.child;
    let mut select = Select::for_mapping(child);
    select.and(
        format!("{}.{} = ?", child.root.name, relationship.owner_column),
        Value::Integer(owner),
    );
    select.fetch(session)
}

/// Persists `children` as the full owned set of `owner`: back-references
/// are set before any child is written, and children missing from the set
/// are deleted when the relationship removes orphans.
pub(crate) fn save_owned<C: Entity>(
    session: &Session<'_>,
    relationship: &Relationship,
    owner: EntityId,
    children: &mut [C],
) -> DaoResult<()> {
    let child_mapping = relationship.child;
    for child in children.iter_mut() {
        if let Some(current) = child.owner_id() {
            if current != owner {
                return Err(DaoError::ConstraintViolation(format!(
                    "{} {} belongs to owner {current}, cannot be saved under owner {owner}",
                    child_mapping.entity,
                    child.id().map_or_else(|| "(new)".to_string(), |id| id.to_string())
                )));
            }
        }

        match relationship.cascade {
            Cascade::All => {
                child.attach_owner(owner);
                save(session, child_mapping, child)?;
            }
            Cascade::None => {
                if child.id().is_none() || child.owner_id() != Some(owner) {
                    return Err(DaoError::ConstraintViolation(format!(
                        "{}.{} does not cascade; children must be saved with their owner reference first",
                        child_mapping.entity, relationship.name
                    )));
                }
            }
        }
    }

    if relationship.orphan_removal {
        let kept: BTreeSet<EntityId> = children.iter().filter_map(|child| child.id()).collect();
        let persisted = select_ids(
            session.conn(),
            &format!(
                "SELECT {} FROM {} WHERE {} = ?",
                child_mapping.id_column, child_mapping.root.name, relationship.owner_column
            ),
            vec![Value::Integer(owner)],
        )?;
        let orphans: Vec<EntityId> = persisted
            .into_iter()
            .filter(|id| !kept.contains(id))
            .collect();
        if !orphans.is_empty() {
            delete_rows(session.conn(), child_mapping, &orphans)?;
        }
    }
    Ok(())
}

/// Deletes rows by identity, cascading through owned relationships first.
fn delete_rows(conn: &Connection, mapping: &'static EntityMapping, ids: &[EntityId]) -> DaoResult<usize> {
    let mut removed = 0;
    for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let chunk_values = || chunk.iter().copied().map(Value::Integer).collect::<Vec<_>>();

        for relationship in mapping.relationships {
            let child = relationship.child;
            let child_ids = select_ids(
                conn,
                &format!(
                    "SELECT {} FROM {} WHERE {} IN ({placeholders})",
                    child.id_column, child.root.name, relationship.owner_column
                ),
                chunk_values(),
            )?;
            if child_ids.is_empty() {
                continue;
            }
            match relationship.cascade {
                Cascade::All => {
                    delete_rows(conn, child, &child_ids)?;
                }
                Cascade::None => {
                    return Err(DaoError::ConstraintViolation(format!(
                        "{} still owns {} {} row(s) through `{}`",
                        mapping.entity,
                        child_ids.len(),
                        child.entity,
                        relationship.name
                    )));
                }
            }
        }

        for table in mapping.joined {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} IN ({placeholders});",
                    table.name, mapping.id_column
                ),
                params_from_iter(chunk_values()),
            )?;
        }
        removed += conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} IN ({placeholders});",
                mapping.root.name, mapping.id_column
            ),
            params_from_iter(chunk_values()),
        )?;
    }
    Ok(removed)
}

fn insert_root(conn: &Connection, mapping: &EntityMapping, values: Vec<Value>) -> DaoResult<EntityId> {
    let columns = std::iter::once(mapping.version_column)
        .chain(mapping.root.columns.iter().copied())
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = numbered_placeholders(1, values.len());
    let separator = if placeholders.is_empty() { "" } else { ", " };
    conn.execute(
        &format!(
            "INSERT INTO {} ({columns}) VALUES (0{separator}{placeholders});",
            mapping.root.name
        ),
        params_from_iter(values),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes the root row guarded by the expected version.
fn update_root(
    conn: &Connection,
    mapping: &'static EntityMapping,
    id: EntityId,
    expected: Version,
    mut values: Vec<Value>,
) -> DaoResult<()> {
    let version = mapping.version_column;
    let mut assignments = vec![format!("{version} = {version} + 1")];
    assignments.extend(
        mapping
            .root
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1)),
    );
    let id_param = values.len() + 1;
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{id_param} AND {version} = ?{}",
        mapping.root.name,
        assignments.join(", "),
        mapping.id_column,
        id_param + 1
    );
    values.push(Value::Integer(id));
    values.push(Value::Integer(expected));
    if let Some((column, tag)) = discriminator_filter(mapping) {
        sql.push_str(&format!(" AND {column} = ?{}", id_param + 2));
        values.push(Value::Text(tag.to_string()));
    }

    let changed = conn.execute(&sql, params_from_iter(values))?;
    if changed == 1 {
        return Ok(());
    }

    match stored_version(conn, mapping, id)? {
        None => Err(DaoError::NotFound {
            entity: mapping.entity,
            id: Some(id),
        }),
        Some(actual) => Err(DaoError::StaleVersion {
            entity: mapping.entity,
            id,
            expected,
            actual,
        }),
    }
}

fn upsert_joined(
    conn: &Connection,
    mapping: &EntityMapping,
    table: &TableMapping,
    id: EntityId,
    values: Vec<Value>,
) -> DaoResult<()> {
    let id_column = mapping.id_column;
    let columns = std::iter::once(id_column)
        .chain(table.columns.iter().copied())
        .collect::<Vec<_>>()
        .join(", ");
    let conflict_action = if table.columns.is_empty() {
        "NOTHING".to_string()
    } else {
        let updates = table
            .columns
            .iter()
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("UPDATE SET {updates}")
    };
    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({}) ON CONFLICT ({id_column}) DO {conflict_action};",
        table.name,
        numbered_placeholders(1, values.len() + 1)
    );

    let mut bind_values = Vec::with_capacity(values.len() + 1);
    bind_values.push(Value::Integer(id));
    bind_values.extend(values);
    conn.execute(&sql, params_from_iter(bind_values))?;
    Ok(())
}

/// Stored version of `id`, restricted to the mapping's variant.
fn stored_version(conn: &Connection, mapping: &EntityMapping, id: EntityId) -> DaoResult<Option<Version>> {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        mapping.version_column, mapping.root.name, mapping.id_column
    );
    let mut bind_values = vec![Value::Integer(id)];
    if let Some((column, tag)) = discriminator_filter(mapping) {
        sql.push_str(&format!(" AND {column} = ?2"));
        bind_values.push(Value::Text(tag.to_string()));
    }
    let version = conn
        .query_row(&sql, params_from_iter(bind_values), |row| row.get::<_, Version>(0))
        .optional()?;
    Ok(version)
}

fn select_ids(conn: &Connection, sql: &str, bind_values: Vec<Value>) -> DaoResult<Vec<EntityId>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get::<_, EntityId>(0)?);
    }
    Ok(ids)
}

fn table_values<E: Entity>(
    mapping: &EntityMapping,
    table: &TableMapping,
    entity: &E,
) -> DaoResult<Option<Vec<Value>>> {
    match entity.column_values(table.name) {
        Some(values) if values.len() != table.columns.len() => Err(DaoError::Mapping(format!(
            "{}: table `{}` maps {} column(s) but the entity supplied {}",
            mapping.entity,
            table.name,
            table.columns.len(),
            values.len()
        ))),
        other => Ok(other),
    }
}

fn check_variant(mapping: &EntityMapping, root_values: &[Value]) -> DaoResult<()> {
    let Some((column, tag)) = discriminator_filter(mapping) else {
        return Ok(());
    };
    let index = mapping.root.column_index(column).unwrap_or(usize::MAX);
    match root_values.get(index) {
        Some(Value::Text(value)) if value == tag => Ok(()),
        other => Err(DaoError::Mapping(format!(
            "{} only stores variant `{tag}`, got {}",
            mapping.entity,
            describe(other)
        ))),
    }
}

fn check_owner(mapping: &EntityMapping, root_values: &[Value]) -> DaoResult<()> {
    let Some(owner) = mapping.owner.as_ref().filter(|owner| !owner.nullable) else {
        return Ok(());
    };
    let index = mapping.root.column_index(owner.column).unwrap_or(usize::MAX);
    match root_values.get(index) {
        Some(Value::Null) | None => Err(DaoError::ConstraintViolation(format!(
            "{}.{} requires an owning {}",
            mapping.entity, owner.column, owner.owner_entity
        ))),
        Some(_) => Ok(()),
    }
}

fn discriminator_filter(mapping: &EntityMapping) -> Option<(&'static str, &'static str)> {
    let discriminator = mapping.discriminator.as_ref()?;
    discriminator.value.map(|tag| (discriminator.column, tag))
}

fn aliased(table: &str, column: &str) -> String {
    format!("{table}.{column} AS \"{}\"", column_alias(table, column))
}

fn numbered_placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(Value::Text(text)) => format!("`{text}`"),
        Some(Value::Null) | None => "no variant".to_string(),
        Some(other) => format!("{other:?}"),
    }
}
