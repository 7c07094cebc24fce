// libs/video-conferencing-cell/src/services/mod.rs
pub mod issuer;

pub use issuer::AccessTokenIssuer;
