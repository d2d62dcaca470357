use axum::{debug_handler, response::{IntoResponse, Redirect, Response}};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{session::USER_ID, AppResult};

#[debug_handler]
pub async fn index(session: Session) -> AppResult<Response> {
    if session.get::<Uuid>(USER_ID).await?.is_some() {
        Ok(Redirect::to("/chat").into_response())
    } else {
        Ok(Redirect::to("/auth").into_response())
    }
}
