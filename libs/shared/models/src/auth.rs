use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Roles recognised by the scheduling engine. Anything else in the token
/// is treated as `Unknown` and gets no scheduling privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Psychologist,
    Admin,
    System,
    Unknown,
}

impl UserRole {
    pub fn from_claim(role: Option<&str>) -> Self {
        match role.map(|r| r.to_ascii_lowercase()).as_deref() {
            Some("patient") | Some("paciente") => UserRole::Patient,
            Some("psychologist") | Some("psicologo") => UserRole::Psychologist,
            Some("admin") | Some("management") => UserRole::Admin,
            Some("system") | Some("service_role") => UserRole::System,
            _ => UserRole::Unknown,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::System)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn user_role(&self) -> UserRole {
        UserRole::from_claim(self.role.as_deref())
    }

    /// Subject id as a UUID; `None` for service tokens with non-UUID subjects.
    pub fn uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    pub fn is(&self, id: Uuid) -> bool {
        self.uuid() == Some(id)
    }
}
