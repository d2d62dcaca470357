use axum::{debug_handler, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{include_res, session::USER_ID, AppResult};

#[debug_handler]
pub(crate) async fn chat_page(session: Session) -> AppResult<Response> {
    if session.get::<Uuid>(USER_ID).await?.is_none() {
        return Ok(Redirect::to("/auth").into_response());
    }

    Ok(Html(include_res!(str, "/pages/chat.html")).into_response())
}
