//! Credential Store
//!
//! Linked-account rows keyed by id, with a unique (project, app, owner)
//! index. Credential material is sealed with [`CredentialCipher`] before it
//! is stored; every mutation of a row happens under one write lock so a
//! refresh write-back is atomic per account.

use crate::cipher::CredentialCipher;
use ::async_trait::async_trait;
use conduit_core::{
    ConduitResult, LinkedAccount, LinkedAccountId, LinkedAccountKey, ProjectId,
    SecurityCredentials, SecuritySchemeKind, StorageError, Timestamp,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Async linked-account persistence contract.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by natural key.
    async fn get_linked_account(
        &self,
        key: &LinkedAccountKey,
    ) -> ConduitResult<Option<LinkedAccount>>;

    async fn get_by_id(&self, id: LinkedAccountId) -> ConduitResult<Option<LinkedAccount>>;

    /// Insert or replace a row. A different row already holding the same key
    /// is a conflict.
    async fn save_linked_account(&self, account: &LinkedAccount) -> ConduitResult<()>;

    /// Create the row for `key`, or overwrite the scheme and credentials of
    /// the existing one, in one step. The row comes back enabled and without
    /// credential material.
    async fn upsert_linked_account(
        &self,
        key: LinkedAccountKey,
        security_scheme: SecuritySchemeKind,
        credentials: Option<SecurityCredentials>,
        at: Timestamp,
    ) -> ConduitResult<LinkedAccount>;

    /// Returns whether a row was removed.
    async fn delete_linked_account(&self, id: LinkedAccountId) -> ConduitResult<bool>;

    /// Replace only the credential material of a row.
    async fn update_credentials(
        &self,
        id: LinkedAccountId,
        credentials: SecurityCredentials,
        at: Timestamp,
    ) -> ConduitResult<()>;

    async fn set_enabled(
        &self,
        id: LinkedAccountId,
        enabled: bool,
        at: Timestamp,
    ) -> ConduitResult<LinkedAccount>;

    /// Record a use of the account.
    async fn touch(&self, id: LinkedAccountId, at: Timestamp) -> ConduitResult<()>;

    async fn list_linked_accounts(
        &self,
        project_id: ProjectId,
        app_name: Option<&str>,
    ) -> ConduitResult<Vec<LinkedAccount>>;
}

struct StoredAccount {
    /// Row metadata; `credentials` is always `None` here.
    record: LinkedAccount,
    sealed: Option<Vec<u8>>,
}

#[derive(Default)]
struct Tables {
    rows: HashMap<LinkedAccountId, StoredAccount>,
    by_key: HashMap<LinkedAccountKey, LinkedAccountId>,
}

/// In-process [`CredentialStore`] that only ever holds ciphertext.
pub struct InMemoryCredentialStore {
    cipher: CredentialCipher,
    tables: RwLock<Tables>,
}

impl std::fmt::Debug for InMemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialStore")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

fn not_found(id: LinkedAccountId) -> StorageError {
    StorageError::NotFound {
        entity: "LinkedAccount".to_string(),
        id: id.to_string(),
    }
}

impl InMemoryCredentialStore {
    pub fn new(cipher: CredentialCipher) -> Self {
        Self {
            cipher,
            tables: RwLock::new(Tables::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw stored bytes of a row's credentials.
    pub async fn sealed_credentials(&self, id: LinkedAccountId) -> Option<Vec<u8>> {
        self.tables
            .read()
            .await
            .rows
            .get(&id)
            .and_then(|row| row.sealed.clone())
    }

    fn open(&self, row: &StoredAccount) -> ConduitResult<LinkedAccount> {
        let mut account = row.record.clone();
        account.credentials = match &row.sealed {
            Some(bytes) => Some(self.cipher.open(bytes)?),
            None => None,
        };
        Ok(account)
    }

    fn seal(&self, account: &LinkedAccount) -> ConduitResult<StoredAccount> {
        let sealed = match &account.credentials {
            Some(creds) => Some(self.cipher.seal(creds)?),
            None => None,
        };
        let mut record = account.clone();
        record.credentials = None;
        Ok(StoredAccount { record, sealed })
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_linked_account(
        &self,
        key: &LinkedAccountKey,
    ) -> ConduitResult<Option<LinkedAccount>> {
        let tables = self.tables.read().await;
        match tables.by_key.get(key).and_then(|id| tables.rows.get(id)) {
            Some(row) => self.open(row).map(Some),
            None => Ok(None),
        }
    }

    async fn get_by_id(&self, id: LinkedAccountId) -> ConduitResult<Option<LinkedAccount>> {
        let tables = self.tables.read().await;
        match tables.rows.get(&id) {
            Some(row) => self.open(row).map(Some),
            None => Ok(None),
        }
    }

    async fn save_linked_account(&self, account: &LinkedAccount) -> ConduitResult<()> {
        let stored = self.seal(account)?;
        let key = account.key();

        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.by_key.get(&key) {
            if *existing != account.id {
                return Err(StorageError::Conflict {
                    entity: "LinkedAccount".to_string(),
                    reason: format!("an account already exists for {}", key),
                }
                .into());
            }
        }
        // The key of an existing row may have changed.
        if let Some(previous) = tables.rows.get(&account.id).map(|r| r.record.key()) {
            tables.by_key.remove(&previous);
        }
        tables.by_key.insert(key, account.id);
        tables.rows.insert(account.id, stored);

        tracing::debug!(
            linked_account_id = %account.id,
            project_id = %account.project_id,
            app_name = %account.app_name,
            "Linked account saved"
        );
        Ok(())
    }

    async fn upsert_linked_account(
        &self,
        key: LinkedAccountKey,
        security_scheme: SecuritySchemeKind,
        credentials: Option<SecurityCredentials>,
        at: Timestamp,
    ) -> ConduitResult<LinkedAccount> {
        let sealed = match &credentials {
            Some(creds) => Some(self.cipher.seal(creds)?),
            None => None,
        };

        let mut tables = self.tables.write().await;
        if let Some(id) = tables.by_key.get(&key).copied() {
            let row = tables.rows.get_mut(&id).ok_or_else(|| not_found(id))?;
            row.record.security_scheme = security_scheme;
            row.record.enabled = true;
            row.record.updated_at = at;
            row.sealed = sealed;
            return Ok(row.record.clone());
        }

        let record = LinkedAccount::new(key.clone(), security_scheme, None, at);
        tables.by_key.insert(key, record.id);
        tables.rows.insert(
            record.id,
            StoredAccount {
                record: record.clone(),
                sealed,
            },
        );
        Ok(record)
    }

    async fn delete_linked_account(&self, id: LinkedAccountId) -> ConduitResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.rows.remove(&id) {
            Some(row) => {
                tables.by_key.remove(&row.record.key());
                tracing::info!(linked_account_id = %id, "Linked account deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_credentials(
        &self,
        id: LinkedAccountId,
        credentials: SecurityCredentials,
        at: Timestamp,
    ) -> ConduitResult<()> {
        let sealed = self.cipher.seal(&credentials)?;
        let mut tables = self.tables.write().await;
        let row = tables.rows.get_mut(&id).ok_or_else(|| not_found(id))?;
        row.sealed = Some(sealed);
        row.record.updated_at = at;
        Ok(())
    }

    async fn set_enabled(
        &self,
        id: LinkedAccountId,
        enabled: bool,
        at: Timestamp,
    ) -> ConduitResult<LinkedAccount> {
        let mut tables = self.tables.write().await;
        let row = tables.rows.get_mut(&id).ok_or_else(|| not_found(id))?;
        row.record.enabled = enabled;
        row.record.updated_at = at;
        let mut account = row.record.clone();
        account.credentials = None;
        Ok(account)
    }

    async fn touch(&self, id: LinkedAccountId, at: Timestamp) -> ConduitResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables.rows.get_mut(&id).ok_or_else(|| not_found(id))?;
        row.record.last_used_at = Some(at);
        Ok(())
    }

    async fn list_linked_accounts(
        &self,
        project_id: ProjectId,
        app_name: Option<&str>,
    ) -> ConduitResult<Vec<LinkedAccount>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<LinkedAccount> = tables
            .rows
            .values()
            .filter(|row| row.record.project_id == project_id)
            .filter(|row| app_name.map_or(true, |name| row.record.app_name == name))
            .map(|row| {
                let mut account = row.record.clone();
                account.credentials = None;
                account
            })
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }
}
