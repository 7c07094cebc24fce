use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use appointment_cell::StoreError;

use crate::models::{SessionCredentials, TokenAuditRecord};

use super::AccessTokenStore;

#[derive(Default)]
pub struct InMemoryTokenStore {
    credentials: RwLock<HashMap<Uuid, SessionCredentials>>,
    audit: RwLock<Vec<TokenAuditRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenStore for InMemoryTokenStore {
    async fn insert_if_absent(
        &self,
        credentials: SessionCredentials,
    ) -> Result<SessionCredentials, StoreError> {
        let mut table = self.credentials.write().await;
        let stored = table.entry(credentials.session_id).or_insert(credentials);
        Ok(stored.clone())
    }

    async fn get_credentials(&self, session_id: Uuid) -> Result<Option<SessionCredentials>, StoreError> {
        Ok(self.credentials.read().await.get(&session_id).cloned())
    }

    async fn append_audit(&self, record: &TokenAuditRecord) -> Result<(), StoreError> {
        self.audit.write().await.push(record.clone());
        Ok(())
    }

    async fn list_audit(&self, session_id: Uuid) -> Result<Vec<TokenAuditRecord>, StoreError> {
        Ok(self
            .audit
            .read()
            .await
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}
