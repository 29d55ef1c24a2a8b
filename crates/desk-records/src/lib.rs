//! Domain records and collaborator contracts for the support inbox.
//!
//! Defines the account-scoped record types touched by inbound chat routing
//! (authorizations, threads, conversations, messages, companies, customers,
//! agents), the async store traits the router consumes, and a snapshot-backed
//! in-memory implementation used by the daemon and tests.

pub mod memory_records;
pub mod records_model;
pub mod records_store;

pub use memory_records::*;
pub use records_model::*;
pub use records_store::*;
