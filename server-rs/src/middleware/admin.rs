use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;
use crate::middleware::auth::AuthUser;

fn role_level(role: &str) -> i32 {
    match role {
        "moderator" => 1,
        "admin" => 2,
        "super_admin" => 3,
        _ => 0,
    }
}

/// Whether a caller with `role` may approve or reject reviews.
pub fn can_moderate(role: Option<&str>) -> bool {
    role.is_some_and(|r| role_level(r) >= role_level("moderator"))
}

/// Middleware: requires moderator role or higher. Must run after `authenticate`.
pub async fn require_moderator(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    if !can_moderate(user.role.as_deref()) {
        tracing::debug!(user_id = %user.id, role = ?user.role, "Moderation denied");
        return Err(AppError::Forbidden(
            "Requires moderator role or higher".into(),
        ));
    }

    Ok(next.run(req).await)
}
