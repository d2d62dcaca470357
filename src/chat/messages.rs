use axum::{debug_handler, extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db, delivery::DeliveryRouter, session, store::StoredMessage, AppResult, RequestError};

const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Deserialize)]
pub(crate) struct SendMessageBody {
    recipient_id: Uuid,
    content: String,
}

#[derive(Serialize)]
pub(crate) struct SendMessageResponse {
    #[serde(flatten)]
    message: StoredMessage,
    status: &'static str,
    #[serde(rename = "message")]
    note: &'static str,
}

fn validate_content(content: &str) -> Result<(), RequestError> {
    if content.trim().is_empty() {
        return Err(RequestError::Invalid("message is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(RequestError::Invalid(format!(
            "message is longer than {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_message(
    State(db_pool): State<SqlitePool>,
    State(delivery): State<DeliveryRouter>,
    session: Session,
    Json(SendMessageBody { recipient_id, content }): Json<SendMessageBody>,
) -> AppResult<Json<SendMessageResponse>> {
    let sender_id = session::resolve(&session, &db_pool).await?;

    validate_content(&content)?;
    if db::find_user(&db_pool, recipient_id).await?.is_none() {
        return Err(RequestError::NotFound("recipient"))?;
    }

    let message = delivery.send(sender_id, recipient_id, &content).await?;

    Ok(Json(SendMessageResponse {
        message,
        status: "ok",
        note: "message saved",
    }))
}

/// The conversation between the caller and `user_id`, oldest first.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    Path(user_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(delivery): State<DeliveryRouter>,
    session: Session,
) -> AppResult<Json<Vec<StoredMessage>>> {
    let current = session::resolve(&session, &db_pool).await?;
    Ok(Json(delivery.history(current, user_id).await?))
}
