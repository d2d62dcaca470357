use axum::{debug_handler, extract::State, Json};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{db::{self, User, UserSummary}, session::{self, AuthError}, AppResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn me(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<User>> {
    let user_id = session::resolve(&session, &db_pool).await?;
    let user = db::find_user(&db_pool, user_id)
        .await?
        .ok_or(AuthError::UnknownUser)?;
    Ok(Json(user))
}

/// Everyone, with the persisted online flag for display. Emails stay private.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn users(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<UserSummary>>> {
    session::resolve(&session, &db_pool).await?;
    Ok(Json(db::list_users(&db_pool).await?))
}
