use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use prochat_db::MessageStore;
use prochat_types::api::{ConversationResponse, MessageResponse, SendMessageRequest};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{ValidJson, ValidPath};
use crate::middleware::Session;

/// Every message between the caller and `friend_id`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    ValidPath(friend_id): ValidPath<Uuid>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let messages = tokio::task::spawn_blocking(move || db.conversation(session.user_id, friend_id))
        .await??;

    Ok(Json(ConversationResponse { messages }))
}

/// Store a message from the caller, then push it to the recipient's open
/// sockets.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ValidJson(req): ValidJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let text = req.text.as_deref().map(str::trim).unwrap_or_default();
    let (Some(recipient), false) = (req.recipient_id, text.is_empty()) else {
        return Err(ApiError::Validation("Recipient and message text required"));
    };

    // Run blocking DB insert off the async runtime
    let db = state.db.clone();
    let text = text.to_string();
    let sender = session.user_id;
    let (message, view) = tokio::task::spawn_blocking(move || {
        let message = db.create_message(sender, recipient, &text)?;
        let view = db.expand_message(&message)?;
        Ok::<_, anyhow::Error>((message, view))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::from(e)
    })??;

    state.dispatcher.deliver(view).await;

    Ok(Json(MessageResponse { message }))
}
