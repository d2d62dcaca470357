use axum::{debug_handler, extract::State, response::{Html, IntoResponse}, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{db, include_res, session::{self, AuthError}, AppResult};

use super::verify_password;

#[derive(Deserialize)]
pub(crate) struct LoginBody {
    email: String,
    password: String,
}

#[debug_handler]
pub(crate) async fn auth_page() -> impl IntoResponse {
    Html(include_res!(str, "/pages/auth.html"))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn login(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(LoginBody { email, password }): Json<LoginBody>,
) -> AppResult<Json<Value>> {
    let email = email.trim().to_lowercase();
    let Some((user, hashed_password)) = db::find_credentials(&db_pool, &email).await? else {
        return Err(AuthError::InvalidCredentials)?;
    };

    let verified = tokio::task::spawn_blocking(move || verify_password(&hashed_password, &password))
        .await
        .map_err(anyhow::Error::from)?;
    if !verified {
        return Err(AuthError::InvalidCredentials)?;
    }

    session::sign_in(&session, user.id).await?;
    tracing::info!(user_id = %user.id, "welcome {}", user.name);

    Ok(Json(json!({ "ok": true, "message": "logged in" })))
}
