use std::sync::LazyLock;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use prochat_db::NewUser;
use prochat_types::api::{AuthResponse, LoginRequest, ProfileResponse, RegisterRequest, StatusResponse};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::Session;
use crate::session::{cleared_session_cookie, session_cookie};

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(name), Some(email), Some(password)) = (
        non_blank(req.name),
        non_blank(req.email),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::Validation("All fields are required"));
    };
    let email = email.to_lowercase();

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::DuplicateEmail);
    }

    let suffix = rand::rng().random_range(0..1000);
    let handle = resolve_handle(&name, req.handle.as_deref(), suffix);

    if state.db.get_user_by_handle(&handle)?.is_some() {
        return Err(ApiError::DuplicateHandle);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();

    // A concurrent registration can still win the race; the UNIQUE
    // constraints turn that into the same duplicate errors.
    state.db.create_user(&NewUser {
        id: user_id,
        name: &name,
        email: &email,
        password_hash: &password_hash,
        handle: &handle,
    })?;

    let user = state
        .db
        .get_user_by_id(user_id)?
        .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", user_id))?;

    info!("registered {} ({})", user.handle, user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".into(),
            user: user.to_public(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(email), Some(password)) = (non_blank(req.email), req.password) else {
        return Err(ApiError::Validation("Email and password are required"));
    };

    let user = state.db.get_user_by_email(&email.to_lowercase())?;

    // Unknown emails still pay for one Argon2 verify.
    let stored = user.as_ref().map(|u| u.password.as_str());
    let (Some(user), true) = (user.as_ref(), password_matches(&password, stored)?) else {
        match &user {
            Some(user) => warn!("failed login for {}", user.id),
            None => warn!("failed login for unknown email"),
        }
        return Err(ApiError::InvalidCredentials);
    };

    let token = state.sessions.issue(user.id)?;
    info!("{} ({}) logged in", user.handle, user.id);

    Ok((
        jar.add(session_cookie(token)),
        Json(AuthResponse {
            message: "Login successful".into(),
            user: user.to_public(),
        }),
    ))
}

/// Clears the client's cookie. The token itself stays valid until it expires.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.add(cleared_session_cookie()),
        Json(StatusResponse {
            message: "Logout successful".into(),
        }),
    )
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(session.user_id)?
        .ok_or(ApiError::NotFound("User not found"))?;
    let friends = state.db.get_friend_ids(user.id)?;

    Ok(Json(ProfileResponse {
        user: user.into_profile(friends),
    }))
}

/// Hash checked when the email is unknown, so both failure paths cost the same.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"not-a-real-password", &salt)
        .map(|hash| hash.to_string())
        .ok()
});

/// Verify `password` against `stored`, or against a throwaway hash when there
/// is no stored one. Always runs exactly one Argon2 verify.
fn password_matches(password: &str, stored: Option<&str>) -> anyhow::Result<bool> {
    let Some(hash) = stored.or(DUMMY_HASH.as_deref()) else {
        anyhow::bail!("dummy password hash unavailable");
    };
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is unreadable: {}", e))?;

    let verified = Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok();
    Ok(verified && stored.is_some())
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The handle to store: the supplied one lowercased, or one derived from the
/// name (`Ada Lovelace` -> `ada_lovelace_<suffix>`).
fn resolve_handle(name: &str, supplied: Option<&str>, suffix: u32) -> String {
    match supplied.map(str::trim).filter(|h| !h.is_empty()) {
        Some(handle) => handle.to_lowercase(),
        None => {
            let base = name.split_whitespace().collect::<Vec<_>>().join("_");
            format!("{}_{}", base.to_lowercase(), suffix)
        }
    }
}
