use axum::{debug_handler, http::header::CONTENT_TYPE, response::IntoResponse, routing::get, Router};

use crate::AppState;

#[macro_export]
macro_rules! include_res {
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/static/auth.js", get(auth_js))
        .route("/static/chat.js", get(chat_js))
        .route("/static/style.css", get(style_css))
}

#[debug_handler]
pub async fn auth_js() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/javascript")], include_res!(str, "/static/auth.js"))
}

#[debug_handler]
pub async fn chat_js() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/javascript")], include_res!(str, "/static/chat.js"))
}

#[debug_handler]
pub async fn style_css() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/css")], include_res!(str, "/static/style.css"))
}
