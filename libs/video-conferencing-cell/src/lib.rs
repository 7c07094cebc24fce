// libs/video-conferencing-cell/src/lib.rs
//! # Video Conferencing Cell
//!
//! Issues the access credentials a conferencing client needs to enter a
//! session's channel. Media transport is handled by the conferencing
//! provider; this cell only decides *when* credentials may be handed out and
//! keeps an audit trail of every hand-out.
//!
//! ## Rules
//!
//! - Credentials are issued only while the session is in progress. Before
//!   the start the request fails with `NotYetStartable`, after the end or
//!   after a cancellation with `WindowClosed`.
//! - Both participants' credentials are minted together on the first
//!   request. Every later request returns the stored set, so a client that
//!   reconnects mid-call keeps a valid credential.
//! - Every issuance is audited (requester, role, channel). The credential
//!   itself is never logged.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                   Video Cell                        |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  HTTP endpoint handlers           |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Credentials, grants, audit rows  |
//! |  error.rs       |  TokenIssuerError                 |
//! |  minting.rs     |  HMAC credential minting          |
//! |  store/         |  Credential + audit persistence   |
//! |  services/      |  AccessTokenIssuer                |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /video/health` - Health check
//! - `POST /video/sessions/{id}/tokens` - Get or issue the caller's credential
//! - `POST /video/sessions/{id}/join` - Issue credential and record attendance
//! - `GET /video/sessions/{id}/audit` - Issuance audit trail (admin)
//!
//! ## Configuration
//!
//! - `VIDEO_TOKEN_SECRET` - HMAC key for credentials (required to issue)
//! - `VIDEO_APP_ID` - conferencing application id embedded in credentials

pub mod error;
pub mod handlers;
pub mod minting;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use error::TokenIssuerError;
pub use handlers::VideoState;
pub use minting::CredentialMinter;
pub use models::{AccessCredential, SessionCredentials, TokenAuditRecord, TokenGrant};
pub use router::video_conferencing_routes;
pub use services::AccessTokenIssuer;
