use std::env;
use std::fmt::Display;
use std::str::FromStr;

use chrono_tz::Tz;
use tracing::warn;

pub const DEFAULT_BUSINESS_TIMEZONE: &str = "America/Sao_Paulo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            "supabase" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub business_timezone: String,
    pub session_duration_minutes: i64,
    pub cancellation_notice_hours: i64,
    pub require_documents_when_late: bool,
    pub booking_step_timeout_ms: u64,
    pub credit_back_validity_days: i64,
    pub availability_horizon_days: i64,
    pub availability_first_hour: u32,
    pub availability_last_hour: u32,
    pub video_token_secret: String,
    pub video_app_id: String,
    pub redis_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            storage_backend: StorageBackend::Memory,
            business_timezone: DEFAULT_BUSINESS_TIMEZONE.to_string(),
            session_duration_minutes: 60,
            cancellation_notice_hours: 24,
            require_documents_when_late: true,
            booking_step_timeout_ms: 5_000,
            credit_back_validity_days: 30,
            availability_horizon_days: 60,
            availability_first_hour: 6,
            availability_last_hour: 23,
            video_token_secret: String::new(),
            video_app_id: String::new(),
            redis_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            storage_backend: parse_var("SCHEDULING_STORAGE", defaults.storage_backend),
            business_timezone: env::var("BUSINESS_TIMEZONE")
                .unwrap_or_else(|_| {
                    warn!("BUSINESS_TIMEZONE not set, using {}", DEFAULT_BUSINESS_TIMEZONE);
                    DEFAULT_BUSINESS_TIMEZONE.to_string()
                }),
            session_duration_minutes: parse_var("SESSION_DURATION_MINUTES", defaults.session_duration_minutes),
            cancellation_notice_hours: parse_var("CANCELLATION_NOTICE_HOURS", defaults.cancellation_notice_hours),
            require_documents_when_late: parse_var("REQUIRE_DOCUMENTS_WHEN_LATE", defaults.require_documents_when_late),
            booking_step_timeout_ms: parse_var("BOOKING_STEP_TIMEOUT_MS", defaults.booking_step_timeout_ms),
            credit_back_validity_days: parse_var("CREDIT_BACK_VALIDITY_DAYS", defaults.credit_back_validity_days),
            availability_horizon_days: parse_var("AVAILABILITY_HORIZON_DAYS", defaults.availability_horizon_days),
            availability_first_hour: parse_var("AVAILABILITY_FIRST_HOUR", defaults.availability_first_hour),
            availability_last_hour: parse_var("AVAILABILITY_LAST_HOUR", defaults.availability_last_hour),
            video_token_secret: env::var("VIDEO_TOKEN_SECRET")
                .unwrap_or_else(|_| {
                    warn!("VIDEO_TOKEN_SECRET not set, session access tokens cannot be issued");
                    String::new()
                }),
            video_app_id: env::var("VIDEO_APP_ID").unwrap_or_default(),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.storage_backend == StorageBackend::Supabase && config.supabase_url.is_empty() {
            warn!("SCHEDULING_STORAGE=supabase but SUPABASE_URL is empty");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_jwt_secret.is_empty()
            && (self.storage_backend == StorageBackend::Memory
                || (!self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()))
    }

    pub fn is_video_configured(&self) -> bool {
        !self.video_token_secret.is_empty()
    }

    /// Canonical civil timezone for every schedule computation. An invalid
    /// name falls back to the default rather than the server's local zone.
    pub fn business_tz(&self) -> Tz {
        self.business_timezone.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                "Invalid BUSINESS_TIMEZONE '{}', using {}",
                self.business_timezone, DEFAULT_BUSINESS_TIMEZONE
            );
            chrono_tz::America::Sao_Paulo
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("{} has invalid value '{}' ({}), using default {}", key, raw, e, default);
            default
        }),
        Err(_) => default,
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Supabase => write!(f, "supabase"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_business_rules() {
        let config = AppConfig::default();
        assert_eq!(config.session_duration_minutes, 60);
        assert_eq!(config.cancellation_notice_hours, 24);
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.business_tz(), chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn invalid_timezone_falls_back() {
        let config = AppConfig {
            business_timezone: "Mars/Olympus_Mons".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.business_tz(), chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn storage_backend_parsing() {
        assert_eq!("Supabase".parse::<StorageBackend>(), Ok(StorageBackend::Supabase));
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn video_configuration_requires_secret() {
        let mut config = AppConfig::default();
        assert!(!config.is_video_configured());
        config.video_token_secret = "secret".to_string();
        assert!(config.is_video_configured());
    }
}
