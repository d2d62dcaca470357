//! Cookie-session identity: who is making this request.

use axum::http::StatusCode;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db, AppResult};

pub const USER_ID: &str = "user_id";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("user no longer exists")]
    UnknownUser,

    #[error("incorrect email or password")]
    InvalidCredentials,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

/// Resolve the session cookie to a user that still exists.
pub async fn resolve(session: &Session, db_pool: &SqlitePool) -> AppResult<Uuid> {
    let Some(user_id) = session.get::<Uuid>(USER_ID).await? else {
        return Err(AuthError::NotLoggedIn)?;
    };

    if db::find_user(db_pool, user_id).await?.is_none() {
        session.flush().await?;
        return Err(AuthError::UnknownUser)?;
    }

    Ok(user_id)
}

/// Bind the session to `user_id`, issuing a fresh session id.
pub async fn sign_in(session: &Session, user_id: Uuid) -> AppResult<()> {
    session.cycle_id().await?;
    session.insert(USER_ID, user_id).await?;
    Ok(())
}
