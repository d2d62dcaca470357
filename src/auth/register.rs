use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{db, AppResult, RequestError};

use super::hash_password;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterBody {
    email: String,
    password: String,
    password_check: String,
    name: String,
}

impl RegisterBody {
    fn validate(&self) -> Result<(), RequestError> {
        let email = self.email.trim();
        if email.len() > 254 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(RequestError::Invalid("email is not valid".into()));
        }
        if !(3..=10).contains(&self.password.chars().count()) {
            return Err(RequestError::Invalid("password must be 3 to 10 characters".into()));
        }
        if !(3..=50).contains(&self.name.trim().chars().count()) {
            return Err(RequestError::Invalid("name must be 3 to 50 characters".into()));
        }
        if self.password != self.password_check {
            return Err(RequestError::PasswordMismatch);
        }
        Ok(())
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn register(
    State(db_pool): State<SqlitePool>,
    Json(body): Json<RegisterBody>,
) -> AppResult<Json<Value>> {
    body.validate()?;

    let email = body.email.trim().to_lowercase();
    if db::find_credentials(&db_pool, &email).await?.is_some() {
        return Err(RequestError::UserAlreadyExists)?;
    }

    let password = body.password;
    let hashed_password = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(anyhow::Error::from)??;

    let user_id = db::create_user(&db_pool, body.name.trim(), &email, &hashed_password).await?;
    tracing::info!(%user_id, "registered user");

    Ok(Json(json!({ "message": "registration successful" })))
}
