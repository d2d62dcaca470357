mod messages;
mod page;
mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(page::chat_page))
        .route("/ws", get(ws::chat_ws))
        .route("/messages", post(messages::send_message))
        .route("/messages/{user_id}", get(messages::history))
}
