use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use appointment_cell::StoreError;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{SessionCredentials, TokenAuditRecord};

use super::AccessTokenStore;

const CREDENTIALS: &str = "/rest/v1/session_credentials";
const AUDIT: &str = "/rest/v1/token_audit";

/// `session_credentials` is keyed by `session_id`; a duplicate insert is
/// ignored and the stored row read back.
pub struct SupabaseTokenStore {
    supabase: SupabaseClient,
}

impl SupabaseTokenStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, StoreError> {
    serde_json::from_value(row).map_err(|e| {
        error!("Undecodable token row from Supabase: {}", e);
        StoreError::Corrupt(e.to_string())
    })
}

#[async_trait]
impl AccessTokenStore for SupabaseTokenStore {
    async fn insert_if_absent(
        &self,
        credentials: SessionCredentials,
    ) -> Result<SessionCredentials, StoreError> {
        let body = serde_json::to_value(&credentials).map_err(|e| StoreError::Backend(e.to_string()))?;
        let inserted: Vec<Value> = self
            .supabase
            .insert_ignoring_duplicates(CREDENTIALS, body)
            .await?;
        if let Some(row) = inserted.into_iter().next() {
            return decode(row);
        }

        self.get_credentials(credentials.session_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("credentials for session {}", credentials.session_id))
            })
    }

    async fn get_credentials(&self, session_id: Uuid) -> Result<Option<SessionCredentials>, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .select(&format!("{}?session_id=eq.{}&limit=1", CREDENTIALS, session_id))
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    async fn append_audit(&self, record: &TokenAuditRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(record).map_err(|e| StoreError::Backend(e.to_string()))?;
        let _: Vec<Value> = self
            .supabase
            .mutate_returning(reqwest::Method::POST, AUDIT, body)
            .await?;
        Ok(())
    }

    async fn list_audit(&self, session_id: Uuid) -> Result<Vec<TokenAuditRecord>, StoreError> {
        let rows: Vec<Value> = self
            .supabase
            .select(&format!("{}?session_id=eq.{}&order=issued_at.asc", AUDIT, session_id))
            .await?;
        rows.into_iter().map(decode).collect()
    }
}
