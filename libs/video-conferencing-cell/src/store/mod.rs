// libs/video-conferencing-cell/src/store/mod.rs
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use appointment_cell::StoreError;
use shared_config::{AppConfig, StorageBackend};

use crate::models::{SessionCredentials, TokenAuditRecord};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryTokenStore;
pub use supabase::SupabaseTokenStore;

#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    /// Stores `credentials` unless a set already exists for the session and
    /// returns whichever set is stored afterwards.
    async fn insert_if_absent(
        &self,
        credentials: SessionCredentials,
    ) -> Result<SessionCredentials, StoreError>;

    async fn get_credentials(&self, session_id: Uuid) -> Result<Option<SessionCredentials>, StoreError>;

    async fn append_audit(&self, record: &TokenAuditRecord) -> Result<(), StoreError>;

    /// Audit records for a session, oldest first.
    async fn list_audit(&self, session_id: Uuid) -> Result<Vec<TokenAuditRecord>, StoreError>;
}

pub fn token_store_from_config(config: &AppConfig) -> Arc<dyn AccessTokenStore> {
    match config.storage_backend {
        StorageBackend::Memory => Arc::new(InMemoryTokenStore::new()),
        StorageBackend::Supabase => Arc::new(SupabaseTokenStore::new(config)),
    }
}
