//! Address book domain model.
//!
//! # Responsibility
//! - Define the persisted entity types and their mapping registrations.
//!
//! # Invariants
//! - Entities are transient (no identity) until their first successful save.
//! - Owned children reference their owner by identity only.

pub mod address;
pub mod communication;

pub use address::{
    Address, AddressDetails, OrganisationalDetails, PersonalDetails, ORGANISATIONAL, PERSONAL,
};
pub use communication::{CommType, Communication};
