//! Conduit Storage
//!
//! Leaf stores the engine reads from and writes to:
//! - [`CatalogStore`]: immutable App/Function snapshot behind an atomic swap
//! - [`CredentialStore`]: linked accounts, encrypted at rest
//! - [`TenantDirectory`]: projects, agents and API key lookup

pub mod catalog;
pub mod cipher;
pub mod credential_store;
pub mod directory;

pub use catalog::{CatalogDocument, CatalogSnapshot, CatalogStore};
pub use cipher::CredentialCipher;
pub use credential_store::{CredentialStore, InMemoryCredentialStore};
pub use directory::{hash_api_key, DirectoryDocument, TenantDirectory};
