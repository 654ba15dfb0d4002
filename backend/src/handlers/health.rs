//! Liveness endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

pub const BANNER: &str = "Factory OA API v1";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

impl HealthResponse {
    pub fn from_database(reachable: bool) -> Self {
        Self {
            status: if reachable { "healthy" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database: if reachable { "connected" } else { "disconnected" },
        }
    }
}

pub async fn root() -> &'static str {
    BANNER
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            false
        }
    };

    Json(HealthResponse::from_database(reachable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_reflects_database() {
        let ok = HealthResponse::from_database(true);
        assert_eq!((ok.status, ok.database), ("healthy", "connected"));

        let down = HealthResponse::from_database(false);
        assert_eq!((down.status, down.database), ("degraded", "disconnected"));
    }
}
