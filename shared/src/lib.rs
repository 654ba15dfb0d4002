//! Shared types and models for the factory OA platform
//!
//! Domain records and the pure business rules behind them: expense
//! proration, inspection progress, device identification and filename
//! safety. Database row mappings are enabled with the `sqlx` feature.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
