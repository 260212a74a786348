use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::session::SESSION_COOKIE;

/// The verified identity attached to a request by `require_session`.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub user_id: Uuid,
}

/// Gate for protected routes: read the session cookie, verify the token and
/// attach the subject to the request.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.sessions.verify(token).map_err(|e| {
        debug!("rejected session token: {}", e);
        ApiError::Unauthorized
    })?;

    req.extensions_mut().insert(Session {
        user_id: claims.sub,
    });
    Ok(next.run(req).await)
}
