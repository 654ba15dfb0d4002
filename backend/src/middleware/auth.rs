//! Authentication middleware
//!
//! JWT authentication and admin access control

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::{AppError, AppResult};
use crate::services::auth::decode_claims;
use crate::AppState;
use shared::models::UserRole;
use shared::validation::same_emp_id;

/// Authenticated employee extracted from the session token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub emp_id: String,
    pub name: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions)
        }
    }

    /// The employee themselves or an admin
    pub fn require_self_or_admin(&self, emp_id: &str) -> AppResult<()> {
        if self.is_admin() || same_emp_id(&self.emp_id, emp_id) {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions)
        }
    }
}

/// Validate the bearer token and attach [`AuthUser`] to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(|| AppError::Unauthorized {
        message: "Missing or invalid Authorization header".to_string(),
        message_zh: "请先登录".to_string(),
    })?;

    let claims = decode_claims(bearer.token(), &state.config.jwt.secret, 0)?;

    request.extensions_mut().insert(AuthUser {
        emp_id: claims.sub,
        name: claims.name,
        role: claims.role,
    });

    Ok(next.run(request).await)
}

/// Reject non-admin callers; must run after [`auth_middleware`]
pub async fn admin_middleware(request: Request, next: Next) -> AppResult<Response> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AppError::InvalidToken)?;
    user.require_admin()?;

    Ok(next.run(request).await)
}

/// Extractor for the authenticated employee
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authentication required".to_string(),
                message_zh: "需要登录".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> AuthUser {
        AuthUser {
            emp_id: "E1".to_string(),
            name: "Wang".to_string(),
            role,
        }
    }

    #[test]
    fn test_admin_checks() {
        assert!(user(UserRole::Admin).require_admin().is_ok());
        assert!(user(UserRole::Sales).require_admin().is_err());
    }

    #[test]
    fn test_self_or_admin() {
        assert!(user(UserRole::User).require_self_or_admin("E1").is_ok());
        assert!(user(UserRole::User).require_self_or_admin("E2").is_err());
        assert!(user(UserRole::Admin).require_self_or_admin("E2").is_ok());
    }
}
