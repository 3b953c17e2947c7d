//! Address book facade over one database handle.
//!
//! # Responsibility
//! - Bundle the DAOs the address book needs on one shared handle.
//! - Provide the sample data set used by the driver and tests.

use crate::config::DatabaseConfig;
use crate::dao::{Dao, DaoResult, Database};
use crate::model::{Address, CommType, Communication, ORGANISATIONAL, PERSONAL};
use log::info;

/// DAOs for addresses (all, personal, organisational) and communications,
/// sharing one session.
#[derive(Debug, Clone)]
pub struct AddressBook {
    database: Database,
    addresses: Dao<Address>,
    personal: Dao<Address>,
    organisational: Dao<Address>,
    communications: Dao<Communication>,
}

impl AddressBook {
    pub fn open(config: &DatabaseConfig) -> DaoResult<Self> {
        Self::from_database(Database::open(config)?)
    }

    pub fn in_memory() -> DaoResult<Self> {
        Self::from_database(Database::open_in_memory()?)
    }

    pub fn from_database(database: Database) -> DaoResult<Self> {
        Ok(Self {
            addresses: database.dao()?,
            personal: database.variant_dao(PERSONAL)?,
            organisational: database.variant_dao(ORGANISATIONAL)?,
            communications: database.dao()?,
            database,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn addresses(&self) -> &Dao<Address> {
        &self.addresses
    }

    pub fn personal(&self) -> &Dao<Address> {
        &self.personal
    }

    pub fn organisational(&self) -> &Dao<Address> {
        &self.organisational
    }

    pub fn communications(&self) -> &Dao<Communication> {
        &self.communications
    }

    /// Removes every address (and, by cascade, every communication) and
    /// commits. Returns the number of addresses removed.
    pub fn reset(&self) -> DaoResult<usize> {
        let removed = self.addresses.delete_all()?;
        self.database.commit()?;
        info!("event=book_reset module=book status=ok removed={removed}");
        Ok(removed)
    }

    /// Saves [`sample_addresses`] and commits; returns the persisted copies.
    pub fn load_samples(&self) -> DaoResult<Vec<Address>> {
        let mut samples = sample_addresses();
        for address in &mut samples {
            self.addresses.save(address)?;
        }
        self.database.commit()?;
        info!(
            "event=book_samples module=book status=ok count={}",
            samples.len()
        );
        Ok(samples)
    }
}

/// Five personal addresses and one organisation; the first carries two
/// communications.
pub fn sample_addresses() -> Vec<Address> {
    let mut nikki = Address::personal("Nikki", "Nico", "Lausi", Some(-23_196_564_000_000));
    nikki.add_comm(Communication::new(
        CommType::Mobile,
        "0167 345 6789",
        "Nikki Handy",
    ));
    nikki.add_comm(Communication::new(
        CommType::Messenger,
        "telegram://Nico_Lausi_1234",
        "Nikki Telegram",
    ));

    vec![
        nikki,
        Address::personal("Doggi", "Oggi", "Dalmatian", Some(1_225_929_600_000)),
        Address::personal("Pipa", "Pille", "Palle", Some(946_684_800_000)),
        Address::personal("Lups", "Luna", "Pudel", Some(1_541_462_400_000)),
        Address::personal("Lemmi", "Ein", "Lemming", Some(1_614_556_800_000)),
        Address::organisational("Die Firma", "TBQ"),
    ]
}
