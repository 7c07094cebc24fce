// libs/video-conferencing-cell/src/services/issuer.rs
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use appointment_cell::events::{DomainEvent, EventBus};
use appointment_cell::models::{ParticipantRole, Requester, Session, SessionStatus};
use appointment_cell::services::lifecycle::{access_window, SessionLifecycleService};
use appointment_cell::SchedulingError;

use crate::error::TokenIssuerError;
use crate::minting::CredentialMinter;
use crate::models::{AccessCredential, JoinedSession, SessionCredentials, TokenAuditRecord, TokenGrant};
use crate::store::AccessTokenStore;

/// Hands out conferencing credentials while a session is in progress.
/// The session's lifecycle status is the only gate.
pub struct AccessTokenIssuer {
    store: Arc<dyn AccessTokenStore>,
    lifecycle: Arc<SessionLifecycleService>,
    events: Arc<EventBus>,
    minter: Option<CredentialMinter>,
}

impl AccessTokenIssuer {
    pub fn new(
        store: Arc<dyn AccessTokenStore>,
        lifecycle: Arc<SessionLifecycleService>,
        events: Arc<EventBus>,
        minter: Option<CredentialMinter>,
    ) -> Self {
        if minter.is_none() {
            warn!("Access token issuer started without a signing secret");
        }
        Self { store, lifecycle, events, minter }
    }

    pub fn is_configured(&self) -> bool {
        self.minter.is_some()
    }

    /// Returns the requester's credential, minting the session's credential
    /// set on the first in-window request and reusing it afterwards.
    #[instrument(skip(self, requester), fields(requester_id = %requester.user_id))]
    pub async fn get_or_issue_tokens(
        &self,
        session_id: Uuid,
        requester: &Requester,
    ) -> Result<TokenGrant, TokenIssuerError> {
        let view = self.lifecycle.get_session_view(session_id).await?;
        let role = participant_role(&view.session, requester)?;

        match view.status {
            SessionStatus::InProgress => {}
            SessionStatus::Reserved => return Err(SchedulingError::NotYetStartable.into()),
            SessionStatus::Completed { .. } | SessionStatus::Cancelled => {
                return Err(SchedulingError::WindowClosed.into())
            }
        }

        let (credentials, first_issue) = match self.store.get_credentials(session_id).await? {
            Some(existing) => (existing, false),
            None => {
                let minted = self.mint_credentials(&view.session)?;
                let stored = self.store.insert_if_absent(minted.clone()).await?;
                let first_issue = stored == minted;
                (stored, first_issue)
            }
        };

        let grant = TokenGrant::from_credentials(&credentials, role, first_issue);
        self.audit(requester, &grant).await?;

        self.events
            .emit(DomainEvent::TokensIssued { session_id, role, first_issue })
            .await;

        Ok(grant)
    }

    /// Issues the requester's credential and stamps their attendance marker.
    #[instrument(skip(self, requester), fields(requester_id = %requester.user_id))]
    pub async fn join_session(
        &self,
        session_id: Uuid,
        requester: &Requester,
    ) -> Result<JoinedSession, TokenIssuerError> {
        let grant = self.get_or_issue_tokens(session_id, requester).await?;
        let session = self.lifecycle.record_join(session_id, grant.role).await?;
        Ok(JoinedSession { grant, session })
    }

    pub async fn audit_trail(
        &self,
        session_id: Uuid,
        requester: &Requester,
    ) -> Result<Vec<TokenAuditRecord>, TokenIssuerError> {
        if !requester.is_staff() {
            return Err(TokenIssuerError::AdminOnly);
        }
        self.lifecycle.get_session(session_id).await?;
        Ok(self.store.list_audit(session_id).await?)
    }

    fn mint_credentials(&self, session: &Session) -> Result<SessionCredentials, TokenIssuerError> {
        let minter = self.minter.as_ref().ok_or(TokenIssuerError::NotConfigured)?;
        let window = access_window(session).ok_or_else(|| {
            SchedulingError::Integrity(format!("session {} has no access window", session.id))
        })?;

        let channel = CredentialMinter::channel_for(session.id);
        let expires_at = window.ends_at;
        let credential = |user_id: Uuid, role: ParticipantRole| -> Result<AccessCredential, TokenIssuerError> {
            let uid = CredentialMinter::uid_for(user_id);
            Ok(AccessCredential {
                role,
                uid,
                token: minter.mint(&channel, uid, role, expires_at)?,
                expires_at,
            })
        };

        Ok(SessionCredentials {
            session_id: session.id,
            channel: channel.clone(),
            app_id: minter.app_id().to_string(),
            patient: credential(session.patient_id, ParticipantRole::Patient)?,
            psychologist: credential(session.psychologist_id, ParticipantRole::Psychologist)?,
            issued_at: self.lifecycle.now(),
            expires_at,
        })
    }

    async fn audit(&self, requester: &Requester, grant: &TokenGrant) -> Result<(), TokenIssuerError> {
        let record = TokenAuditRecord {
            id: Uuid::new_v4(),
            session_id: grant.session_id,
            requester_id: requester.user_id,
            requester_role: requester.role,
            role: grant.role,
            channel: grant.channel.clone(),
            first_issue: grant.first_issue,
            issued_at: self.lifecycle.now(),
        };
        self.store.append_audit(&record).await?;

        info!(
            "AUDIT: credential issued session={} requester={} role={} channel={} first_issue={}",
            record.session_id, record.requester_id, record.role, record.channel, record.first_issue
        );
        Ok(())
    }
}

fn participant_role(session: &Session, requester: &Requester) -> Result<ParticipantRole, TokenIssuerError> {
    session.participant_role(requester.user_id).ok_or_else(|| {
        warn!("User {} requested credentials for session {}", requester.user_id, session.id);
        TokenIssuerError::NotParticipant(session.id.to_string())
    })
}
