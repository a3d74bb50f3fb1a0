mod database;
mod identity_store;

pub use database::{Database, DatabaseError};
pub use identity_store::{IdentityStore, SessionToken, StoreError};
