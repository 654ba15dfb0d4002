//! Request middleware and extractors

pub mod auth;
pub mod client;

pub use auth::{admin_middleware, auth_middleware, AuthUser, CurrentUser};
pub use client::ClientInfo;
