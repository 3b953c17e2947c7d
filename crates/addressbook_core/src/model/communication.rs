//! Communication child record.
//!
//! # Invariants
//! - A persisted communication always has an owning address.
//! - The owner reference is a plain identity; the owner holds the set.

use crate::dao::{DaoError, DaoResult, Entity, EntityId, MappedRow, Value, Version};
use crate::schema::{EntityMapping, ExampleField, Matcher, OwnerReference, TableMapping};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub(crate) const COMMUNICATIONS_TABLE: &str = "communications";
pub(crate) const OWNER_COLUMN: &str = "owner_id";

/// Mapping of [`Communication`].
pub static COMMUNICATION: EntityMapping = EntityMapping {
    entity: "Communication",
    root: TableMapping {
        name: COMMUNICATIONS_TABLE,
        columns: &["comm_type", "locator", "note", OWNER_COLUMN],
    },
    id_column: "id",
    version_column: "version",
    discriminator: None,
    joined: &[],
    owner: Some(OwnerReference {
        column: OWNER_COLUMN,
        owner_entity: "Address",
        nullable: false,
    }),
    relationships: &[],
    example_fields: &[
        ExampleField {
            table: COMMUNICATIONS_TABLE,
            column: "comm_type",
            matcher: Matcher::Exact,
        },
        ExampleField {
            table: COMMUNICATIONS_TABLE,
            column: "locator",
            matcher: Matcher::Wildcard,
        },
        ExampleField {
            table: COMMUNICATIONS_TABLE,
            column: "note",
            matcher: Matcher::Wildcard,
        },
        ExampleField {
            table: COMMUNICATIONS_TABLE,
            column: OWNER_COLUMN,
            matcher: Matcher::Exact,
        },
    ],
};

static COMMUNICATION_MAPPINGS: [&EntityMapping; 1] = [&COMMUNICATION];

/// Channel category of a communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommType {
    Phone,
    Mobile,
    Fax,
    Email,
    Messenger,
    Web,
}

impl CommType {
    pub const ALL: [CommType; 6] = [
        Self::Phone,
        Self::Mobile,
        Self::Fax,
        Self::Email,
        Self::Messenger,
        Self::Web,
    ];

    /// Stored and serialized name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Mobile => "mobile",
            Self::Fax => "fax",
            Self::Email => "email",
            Self::Messenger => "messenger",
            Self::Web => "web",
        }
    }
}

impl Display for CommType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommType {
    type Err = DaoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| DaoError::InvalidData(format!("unknown communication type `{value}`")))
    }
}

/// One way of reaching an address: a phone number, a mail address, a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    id: Option<EntityId>,
    version: Option<Version>,
    /// `None` only in query-by-example templates.
    pub comm_type: Option<CommType>,
    pub locator: String,
    pub note: String,
    #[serde(rename = "owner_id")]
    owner: Option<EntityId>,
}

impl Communication {
    pub fn new(comm_type: CommType, locator: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            comm_type: Some(comm_type),
            locator: locator.into(),
            note: note.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    /// Sets the back-reference; needed when saving through a
    /// `Dao<Communication>` instead of through the owning address.
    pub fn set_owner(&mut self, owner: EntityId) {
        self.owner = Some(owner);
    }
}

impl Entity for Communication {
    fn mappings() -> &'static [&'static EntityMapping] {
        &COMMUNICATION_MAPPINGS
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn version(&self) -> Option<Version> {
        self.version
    }

    fn mark_persisted(&mut self, id: EntityId, version: Version) {
        self.id = Some(id);
        self.version = Some(version);
    }

    fn column_values(&self, table: &str) -> Option<Vec<Value>> {
        if table != COMMUNICATIONS_TABLE {
            return None;
        }
        Some(vec![
            self.comm_type
                .map_or(Value::Null, |kind| Value::Text(kind.as_str().to_string())),
            Value::Text(self.locator.clone()),
            Value::Text(self.note.clone()),
            self.owner.map_or(Value::Null, Value::Integer),
        ])
    }

    fn from_row(row: &MappedRow<'_, '_>) -> DaoResult<Self> {
        let comm_type = row
            .get::<Option<String>>(COMMUNICATIONS_TABLE, "comm_type")?
            .map(|value| value.parse::<CommType>())
            .transpose()?;
        Ok(Self {
            id: Some(row.id()?),
            version: Some(row.version()?),
            comm_type,
            locator: row.get(COMMUNICATIONS_TABLE, "locator")?,
            note: row.get(COMMUNICATIONS_TABLE, "note")?,
            owner: row.get(COMMUNICATIONS_TABLE, OWNER_COLUMN)?,
        })
    }

    fn owner_id(&self) -> Option<EntityId> {
        self.owner
    }

    fn attach_owner(&mut self, owner: EntityId) {
        self.owner = Some(owner);
    }
}
