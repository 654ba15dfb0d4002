//! Router and access control tests
//!
//! Requests go through the full application router. The pool is lazy and
//! never connects, so only routes rejected before reaching a handler that
//! queries the database are exercised here.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use factory_oa_backend::config::{
    AttendanceConfig, Config, DatabaseConfig, ExpenseConfig, JwtConfig, ServerConfig,
    StorageConfig, TotpConfig,
};
use factory_oa_backend::services::auth::{encode_claims, Claims};
use factory_oa_backend::{create_app, AppState};
use shared::models::UserRole;

const JWT_SECRET: &str = "routes-test-secret";

fn test_config() -> Config {
    Config {
        environment: "test".to_string(),
        server: ServerConfig::default(),
        database: DatabaseConfig {
            url: "postgres://oa:oa@127.0.0.1:1/oa_test".to_string(),
            max_connections: 1,
            min_connections: 0,
        },
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
            access_token_expiry: 3600,
            refresh_leeway: 300,
        },
        totp: TotpConfig {
            issuer: "FactoryOA".to_string(),
            period: 30,
            digits: 6,
            skew: 1,
        },
        attendance: AttendanceConfig {
            utc_offset_hours: 8,
            require_inner_network: true,
            arp_table_path: PathBuf::from("/proc/net/arp"),
        },
        storage: StorageConfig {
            assets_dir: std::env::temp_dir().join("factory-oa-routes-test"),
            max_upload_bytes: 1024 * 1024,
        },
        expense: ExpenseConfig {
            default_annual_target: Decimal::new(1_000_000_000, 2),
        },
    }
}

fn app() -> Router {
    let config = test_config();
    let db = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database.url)
        .unwrap();
    create_app(AppState {
        db,
        config: Arc::new(config),
    })
}

fn token(role: UserRole, exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: "E1001".to_string(),
        name: "Chen Jing".to_string(),
        role,
        iat: now,
        exp: now + exp_offset,
    };
    encode_claims(&claims, JWT_SECRET).unwrap()
}

async fn send(method: Method, uri: &str, bearer: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = app()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn error_code(body: &serde_json::Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_root_banner() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Factory OA API v1");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (status, body) = send(Method::GET, "/api/v1/auth/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let expired = token(UserRole::Admin, -60);
        let (status, body) = send(Method::GET, "/api/v1/orders", Some(&expired)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_forged_token_is_rejected() {
        let (status, body) = send(Method::GET, "/api/v1/orders", Some("abc.def.ghi")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_admin_routes_reject_employees() {
        let sales = token(UserRole::Sales, 600);
        for uri in [
            "/api/v1/employees",
            "/api/v1/expenses",
            "/api/v1/attendance/records",
            "/api/v1/inquiry-logs",
        ] {
            let (status, body) = send(Method::GET, uri, Some(&sales)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
            assert_eq!(error_code(&body), "INSUFFICIENT_PERMISSIONS");
        }
    }

    #[tokio::test]
    async fn test_admin_methods_on_shared_paths() {
        let user = token(UserRole::User, 600);
        let id = uuid::Uuid::new_v4();

        for (method, uri) in [
            (Method::DELETE, format!("/api/v1/inspections/{}", id)),
            (Method::DELETE, format!("/api/v1/display-files/{}", id)),
            (Method::PUT, "/api/v1/employees/E1001".to_string()),
            (Method::DELETE, "/api/v1/employees/E1001".to_string()),
            (Method::POST, "/api/v1/machines".to_string()),
            (Method::PUT, "/api/v1/machines/SW-420".to_string()),
            (Method::DELETE, "/api/v1/machines/SW-420".to_string()),
            (Method::POST, "/api/v1/parts".to_string()),
            (Method::DELETE, "/api/v1/parts/7".to_string()),
        ] {
            let (status, _) = send(method.clone(), &uri, Some(&user)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_catalog_imports_are_admin_only() {
        let sales = token(UserRole::Sales, 600);
        for uri in [
            "/api/v1/machines/import",
            "/api/v1/machines/import-json",
            "/api/v1/parts/import-json",
        ] {
            let (status, body) = send(Method::POST, uri, Some(&sales)).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
            assert_eq!(error_code(&body), "INSUFFICIENT_PERMISSIONS");
        }
    }

    #[tokio::test]
    async fn test_catalog_requires_login() {
        for uri in ["/api/v1/machines", "/api/v1/parts", "/api/v1/machines/export"] {
            let (status, body) = send(Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(error_code(&body), "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = send(Method::GET, "/api/v1/no-such-route", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
