// libs/video-conferencing-cell/src/minting.rs
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use appointment_cell::models::ParticipantRole;
use shared_config::AppConfig;

use crate::error::TokenIssuerError;

type HmacSha256 = Hmac<Sha256>;

pub const CREDENTIAL_VERSION: &str = "v1";

/// Fields signed into a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialClaims {
    pub app_id: String,
    pub channel: String,
    pub uid: u32,
    pub role: ParticipantRole,
    pub expires_at: DateTime<Utc>,
    pub nonce: u64,
}

impl CredentialClaims {
    fn payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.app_id,
            self.channel,
            self.uid,
            self.role,
            self.expires_at.timestamp(),
            self.nonce
        )
    }

    fn parse(payload: &str) -> Option<Self> {
        let parts: Vec<&str> = payload.split('|').collect();
        let [app_id, channel, uid, role, expires_at, nonce] = parts.as_slice() else {
            return None;
        };
        let role = match *role {
            "patient" => ParticipantRole::Patient,
            "psychologist" => ParticipantRole::Psychologist,
            _ => return None,
        };
        Some(Self {
            app_id: app_id.to_string(),
            channel: channel.to_string(),
            uid: uid.parse().ok()?,
            role,
            expires_at: Utc.timestamp_opt(expires_at.parse().ok()?, 0).single()?,
            nonce: nonce.parse().ok()?,
        })
    }
}

/// Mints `v1.<payload>.<signature>` credentials, both parts base64url,
/// the signature being HMAC-SHA256 over the payload.
#[derive(Clone)]
pub struct CredentialMinter {
    secret: Vec<u8>,
    app_id: String,
}

impl CredentialMinter {
    pub fn new(secret: &str, app_id: &str) -> Result<Self, TokenIssuerError> {
        if secret.is_empty() {
            return Err(TokenIssuerError::NotConfigured);
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            app_id: app_id.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, TokenIssuerError> {
        Self::new(&config.video_token_secret, &config.video_app_id)
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn channel_for(session_id: Uuid) -> String {
        format!("session_{}", session_id.simple())
    }

    /// Numeric conferencing uid: first four bytes of the user id with the
    /// top bit cleared, so it fits a signed 32-bit field.
    pub fn uid_for(user_id: Uuid) -> u32 {
        let bytes = user_id.as_bytes();
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7FFF_FFFF
    }

    pub fn mint(
        &self,
        channel: &str,
        uid: u32,
        role: ParticipantRole,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenIssuerError> {
        let claims = CredentialClaims {
            app_id: self.app_id.clone(),
            channel: channel.to_string(),
            uid,
            role,
            expires_at,
            nonce: rand::random::<u64>(),
        };
        let payload = claims.payload();
        let signature = self.sign(payload.as_bytes())?;

        Ok(format!(
            "{}.{}.{}",
            CREDENTIAL_VERSION,
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Checks signature and expiry and returns the signed claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<CredentialClaims, TokenIssuerError> {
        let mut parts = token.split('.');
        let (payload_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(CREDENTIAL_VERSION), Some(p), Some(s), None) => (p, s),
            _ => return Err(TokenIssuerError::Minting("malformed credential".to_string())),
        };

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenIssuerError::Minting("bad payload encoding".to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenIssuerError::Minting("bad signature encoding".to_string()))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenIssuerError::Minting("signature mismatch".to_string()))?;

        let claims = std::str::from_utf8(&payload)
            .ok()
            .and_then(CredentialClaims::parse)
            .ok_or_else(|| TokenIssuerError::Minting("unreadable claims".to_string()))?;

        if claims.expires_at <= now {
            return Err(TokenIssuerError::Minting("credential expired".to_string()));
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenIssuerError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenIssuerError::Minting(e.to_string()))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, TokenIssuerError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl fmt::Debug for CredentialMinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMinter")
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
