use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use prochat_db::UserRow;
use prochat_types::api::{
    AddFriendResponse, FriendRequest, FriendsResponse, SearchQuery, SearchResponse, StatusResponse,
};

use crate::AppState;
use crate::auth::non_blank;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::Session;

/// Friendship is mutual: adding makes both users friends of each other.
pub async fn add_friend(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ValidJson(req): ValidJson<FriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (current, target) = resolve_pair(&state, session, req)?;

    if target.id == current.id {
        return Err(ApiError::Validation("You cannot add yourself as a friend"));
    }
    if state.db.are_friends(current.id, target.id)? {
        return Err(ApiError::DuplicateFriend);
    }

    state.db.add_friendship(current.id, target.id)?;
    info!("{} and {} are now friends", current.handle, target.handle);

    Ok(Json(AddFriendResponse {
        message: "Friend added successfully".into(),
        friend: target.to_public(),
    }))
}

/// Removes the friendship on both sides. Removing a non-friend succeeds.
pub async fn remove_friend(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ValidJson(req): ValidJson<FriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (current, target) = resolve_pair(&state, session, req)?;

    state.db.remove_friendship(current.id, target.id)?;
    info!("{} and {} are no longer friends", current.handle, target.handle);

    Ok(Json(StatusResponse {
        message: "Friend removed successfully".into(),
    }))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_user_by_id(session.user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found"));
    }
    let friends = state
        .db
        .get_friends(session.user_id)?
        .iter()
        .map(UserRow::to_public)
        .collect();

    Ok(Json(FriendsResponse { friends }))
}

/// Name or handle substring search, case-insensitive, never returning the caller.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let Some(query) = non_blank(params.query) else {
        return Ok((StatusCode::BAD_REQUEST, Json(SearchResponse { users: vec![] })).into_response());
    };

    let users = state
        .db
        .search_users(&query, session.user_id)?
        .iter()
        .map(UserRow::to_public)
        .collect();

    Ok(Json(SearchResponse { users }).into_response())
}

/// Load the caller and the user named by the request's handle.
fn resolve_pair(
    state: &AppState,
    session: Session,
    req: FriendRequest,
) -> Result<(UserRow, UserRow), ApiError> {
    let handle = non_blank(req.handle)
        .ok_or(ApiError::Validation("User ID is required"))?
        .to_lowercase();

    let current = state
        .db
        .get_user_by_id(session.user_id)?
        .ok_or(ApiError::NotFound("User not found"))?;
    let target = state
        .db
        .get_user_by_handle(&handle)?
        .ok_or(ApiError::NotFound("User not found"))?;

    Ok((current, target))
}
