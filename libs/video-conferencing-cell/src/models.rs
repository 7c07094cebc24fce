// libs/video-conferencing-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{ParticipantRole, RequesterRole, SessionView};

// ==============================================================================
// CREDENTIAL MODELS
// ==============================================================================

/// One participant's credential for a session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredential {
    pub role: ParticipantRole,
    pub uid: u32,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Credential set for a session, minted once for both participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub session_id: Uuid,
    pub channel: String,
    pub app_id: String,
    pub patient: AccessCredential,
    pub psychologist: AccessCredential,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredentials {
    pub fn for_role(&self, role: ParticipantRole) -> &AccessCredential {
        match role {
            ParticipantRole::Patient => &self.patient,
            ParticipantRole::Psychologist => &self.psychologist,
        }
    }
}

/// What a participant receives: their own credential and the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub session_id: Uuid,
    pub channel: String,
    pub app_id: String,
    pub role: ParticipantRole,
    pub uid: u32,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub first_issue: bool,
}

impl TokenGrant {
    pub fn from_credentials(credentials: &SessionCredentials, role: ParticipantRole, first_issue: bool) -> Self {
        let credential = credentials.for_role(role);
        Self {
            session_id: credentials.session_id,
            channel: credentials.channel.clone(),
            app_id: credentials.app_id.clone(),
            role,
            uid: credential.uid,
            token: credential.token.clone(),
            expires_at: credential.expires_at,
            first_issue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedSession {
    pub grant: TokenGrant,
    pub session: SessionView,
}

// ==============================================================================
// AUDIT MODELS
// ==============================================================================

/// One issuance, first or repeated. Never carries the credential itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAuditRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub requester_id: Uuid,
    pub requester_role: RequesterRole,
    pub role: ParticipantRole,
    pub channel: String,
    pub first_issue: bool,
    pub issued_at: DateTime<Utc>,
}
