//! Address entity: personal and organisational variants sharing one root.
//!
//! # Responsibility
//! - Define the address shape and its owned communications.
//! - Register the root mapping and one mapping per variant.
//!
//! # Invariants
//! - `addresses.kind` always agrees with the `AddressDetails` variant.
//! - The address owns its communications: they are saved, loaded and deleted
//!   together with it, and dropping one from the set deletes it on save.

use super::communication::{Communication, COMMUNICATION, OWNER_COLUMN};
use crate::dao::{DaoError, DaoResult, Entity, EntityId, MappedRow, Session, Value, Version};
use crate::schema::{
    Cascade, Discriminator, EntityMapping, ExampleField, Matcher, Relationship, TableMapping,
};
use serde::{Deserialize, Serialize};

pub const PERSONAL: &str = "personal";
pub const ORGANISATIONAL: &str = "organisational";

const ADDRESSES: &str = "addresses";
const PERSONAL_ADDRESSES: &str = "personal_addresses";
const ORGANISATIONAL_ADDRESSES: &str = "organisational_addresses";
const KIND_COLUMN: &str = "kind";

const ROOT_TABLE: TableMapping = TableMapping {
    name: ADDRESSES,
    columns: &[KIND_COLUMN, "nickname"],
};
const PERSONAL_TABLE: TableMapping = TableMapping {
    name: PERSONAL_ADDRESSES,
    columns: &["first_name", "last_name", "born_at"],
};
const ORGANISATIONAL_TABLE: TableMapping = TableMapping {
    name: ORGANISATIONAL_ADDRESSES,
    columns: &["name", "department"],
};

const NICKNAME_FIELD: ExampleField = ExampleField {
    table: ADDRESSES,
    column: "nickname",
    matcher: Matcher::Wildcard,
};
const FIRST_NAME_FIELD: ExampleField = ExampleField {
    table: PERSONAL_ADDRESSES,
    column: "first_name",
    matcher: Matcher::Wildcard,
};
const LAST_NAME_FIELD: ExampleField = ExampleField {
    table: PERSONAL_ADDRESSES,
    column: "last_name",
    matcher: Matcher::Wildcard,
};
const BORN_AT_FIELD: ExampleField = ExampleField {
    table: PERSONAL_ADDRESSES,
    column: "born_at",
    matcher: Matcher::Exact,
};
const NAME_FIELD: ExampleField = ExampleField {
    table: ORGANISATIONAL_ADDRESSES,
    column: "name",
    matcher: Matcher::Wildcard,
};
const DEPARTMENT_FIELD: ExampleField = ExampleField {
    table: ORGANISATIONAL_ADDRESSES,
    column: "department",
    matcher: Matcher::Wildcard,
};

static ADDRESS_RELATIONSHIPS: [Relationship; 1] = [Relationship {
    name: "comms",
    child: &COMMUNICATION,
    owner_column: OWNER_COLUMN,
    cascade: Cascade::All,
    orphan_removal: true,
}];

/// Polymorphic root mapping: every address, both variant tables joined.
pub static ADDRESS: EntityMapping = EntityMapping {
    entity: "Address",
    root: ROOT_TABLE,
    id_column: "id",
    version_column: "version",
    discriminator: Some(Discriminator {
        column: KIND_COLUMN,
        value: None,
    }),
    joined: &[PERSONAL_TABLE, ORGANISATIONAL_TABLE],
    owner: None,
    relationships: &ADDRESS_RELATIONSHIPS,
    example_fields: &[
        NICKNAME_FIELD,
        FIRST_NAME_FIELD,
        LAST_NAME_FIELD,
        BORN_AT_FIELD,
        NAME_FIELD,
        DEPARTMENT_FIELD,
    ],
};

pub static PERSONAL_ADDRESS: EntityMapping = EntityMapping {
    entity: "PersonalAddress",
    root: ROOT_TABLE,
    id_column: "id",
    version_column: "version",
    discriminator: Some(Discriminator {
        column: KIND_COLUMN,
        value: Some(PERSONAL),
    }),
    joined: &[PERSONAL_TABLE],
    owner: None,
    relationships: &ADDRESS_RELATIONSHIPS,
    example_fields: &[NICKNAME_FIELD, FIRST_NAME_FIELD, LAST_NAME_FIELD, BORN_AT_FIELD],
};

pub static ORGANISATIONAL_ADDRESS: EntityMapping = EntityMapping {
    entity: "OrganisationalAddress",
    root: ROOT_TABLE,
    id_column: "id",
    version_column: "version",
    discriminator: Some(Discriminator {
        column: KIND_COLUMN,
        value: Some(ORGANISATIONAL),
    }),
    joined: &[ORGANISATIONAL_TABLE],
    owner: None,
    relationships: &ADDRESS_RELATIONSHIPS,
    example_fields: &[NICKNAME_FIELD, NAME_FIELD, DEPARTMENT_FIELD],
};

static ADDRESS_MAPPINGS: [&EntityMapping; 3] =
    [&ADDRESS, &PERSONAL_ADDRESS, &ORGANISATIONAL_ADDRESS];

/// Person-specific columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalDetails {
    pub first_name: String,
    pub last_name: String,
    /// Unix epoch milliseconds.
    pub born_at: Option<i64>,
}

/// Organisation-specific columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganisationalDetails {
    pub name: String,
    pub department: String,
}

/// Variant payload; serialized with a `kind` tag matching the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressDetails {
    Personal(PersonalDetails),
    Organisational(OrganisationalDetails),
}

impl Default for AddressDetails {
    fn default() -> Self {
        Self::Personal(PersonalDetails::default())
    }
}

/// Address book entry.
///
/// Identity and version are assigned by the DAO on first save and are
/// read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    id: Option<EntityId>,
    version: Option<Version>,
    pub nickname: String,
    pub details: AddressDetails,
    comms: Vec<Communication>,
}

impl Address {
    pub fn personal(
        nickname: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        born_at: Option<i64>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            details: AddressDetails::Personal(PersonalDetails {
                first_name: first_name.into(),
                last_name: last_name.into(),
                born_at,
            }),
            ..Self::default()
        }
    }

    pub fn organisational(nickname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            details: AddressDetails::Organisational(OrganisationalDetails {
                name: name.into(),
                department: String::new(),
            }),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Stored discriminator of this address.
    pub fn variant(&self) -> &'static str {
        match self.details {
            AddressDetails::Personal(_) => PERSONAL,
            AddressDetails::Organisational(_) => ORGANISATIONAL,
        }
    }

    pub fn comms(&self) -> &[Communication] {
        &self.comms
    }

    pub fn comms_mut(&mut self) -> &mut Vec<Communication> {
        &mut self.comms
    }

    /// Adds `comm` to the owned set; persisted with the next save.
    pub fn add_comm(&mut self, mut comm: Communication) {
        if let Some(id) = self.id {
            comm.set_owner(id);
        }
        self.comms.push(comm);
    }

    /// Removes a communication from the owned set; the next save deletes it.
    pub fn remove_comm(&mut self, index: usize) -> Option<Communication> {
        (index < self.comms.len()).then(|| self.comms.remove(index))
    }
}

impl Entity for Address {
    fn mappings() -> &'static [&'static EntityMapping] {
        &ADDRESS_MAPPINGS
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
        match (table, &self.details) {
            (ADDRESSES, _) => Some(vec![
                Value::Text(self.variant().to_string()),
                Value::Text(self.nickname.clone()),
            ]),
            (PERSONAL_ADDRESSES, AddressDetails::Personal(person)) => Some(vec![
                Value::Text(person.first_name.clone()),
                Value::Text(person.last_name.clone()),
                person.born_at.map_or(Value::Null, Value::Integer),
            ]),
            (ORGANISATIONAL_ADDRESSES, AddressDetails::Organisational(organisation)) => {
                Some(vec![
                    Value::Text(organisation.name.clone()),
                    Value::Text(organisation.department.clone()),
                ])
            }
            _ => None,
        }
    }

    fn from_row(row: &MappedRow<'_, '_>) -> DaoResult<Self> {
        let kind: String = row.get(ADDRESSES, KIND_COLUMN)?;
        let details = match kind.as_str() {
            PERSONAL if row.has_row(PERSONAL_ADDRESSES)? => {
                AddressDetails::Personal(PersonalDetails {
                    first_name: row.get(PERSONAL_ADDRESSES, "first_name")?,
                    last_name: row.get(PERSONAL_ADDRESSES, "last_name")?,
                    born_at: row.get(PERSONAL_ADDRESSES, "born_at")?,
                })
            }
            ORGANISATIONAL if row.has_row(ORGANISATIONAL_ADDRESSES)? => {
                AddressDetails::Organisational(OrganisationalDetails {
                    name: row.get(ORGANISATIONAL_ADDRESSES, "name")?,
                    department: row.get(ORGANISATIONAL_ADDRESSES, "department")?,
                })
            }
            other => {
                return Err(DaoError::InvalidData(format!(
                    "{}: no `{other}` row for address {}",
                    row.mapping().entity,
                    row.id()?
                )))
            }
        };
        Ok(Self {
            id: Some(row.id()?),
            version: Some(row.version()?),
            nickname: row.get(ADDRESSES, "nickname")?,
            details,
            comms: Vec::new(),
        })
    }

    fn save_children(&mut self, session: &Session<'_>) -> DaoResult<()> {
        let Some(id) = self.id else {
            return Ok(());
        };
        session.save_owned(&ADDRESS_RELATIONSHIPS[0], id, &mut self.comms)
    }

    fn load_children(&mut self, session: &Session<'_>) -> DaoResult<()> {
        if let Some(id) = self.id {
            self.comms = session.load_owned(&ADDRESS_RELATIONSHIPS[0], id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::communication::CommType;

    #[test]
    fn mappings_validate() {
        for mapping in Address::mappings() {
            mapping.validate().unwrap();
        }
    }

    #[test]
    fn variant_tables_only_for_matching_details() {
        let person = Address::personal("Lups", "Luna", "Pudel", Some(1));
        assert!(person.column_values(PERSONAL_ADDRESSES).is_some());
        assert!(person.column_values(ORGANISATIONAL_ADDRESSES).is_none());

        let firm = Address::organisational("Die Firma", "TBQ");
        assert_eq!(
            firm.column_values(ADDRESSES).unwrap()[0],
            Value::Text(ORGANISATIONAL.to_string())
        );
        assert!(firm.column_values(PERSONAL_ADDRESSES).is_none());
    }

    #[test]
    fn add_comm_sets_owner_only_for_persisted_address() {
        let mut address = Address::personal("Nikki", "Nico", "Lausi", None);
        address.add_comm(Communication::new(CommType::Mobile, "0167", "Handy"));
        assert_eq!(address.comms()[0].owner(), None);

        address.mark_persisted(9, 0);
        address.add_comm(Communication::new(CommType::Email, "n@l.de", "Mail"));
        assert_eq!(address.comms()[1].owner(), Some(9));
    }

    #[test]
    fn remove_comm_ignores_out_of_range() {
        let mut address = Address::default();
        address.add_comm(Communication::new(CommType::Web, "https://x", ""));
        assert!(address.remove_comm(3).is_none());
        assert_eq!(address.remove_comm(0).unwrap().locator, "https://x");
        assert!(address.comms().is_empty());
    }
}
