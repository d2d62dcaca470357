use std::sync::Arc;

use axum::{debug_handler, extract::{State, WebSocketUpgrade}, response::Response};
use futures_util::StreamExt;
use sqlx::SqlitePool;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_sessions::Session;

use crate::{
    config::Settings,
    connection::{ConnectionSession, SessionTuning},
    presence::PresenceRegistry,
    session,
    store::PresenceFlags,
    AppResult,
};

/// Accept the caller's push channel. Identity comes from the session cookie
/// and is checked before the upgrade, so a rejected caller never touches presence.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(db_pool): State<SqlitePool>,
    State(presence): State<PresenceRegistry>,
    State(flags): State<Arc<dyn PresenceFlags>>,
    State(settings): State<Arc<Settings>>,
    State(shutdown): State<CancellationToken>,
    State(sessions): State<TaskTracker>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = session::resolve(&session, &db_pool).await?;
    let tuning = SessionTuning::from(settings.as_ref());

    Ok(ws.on_upgrade(move |socket| {
        sessions.track_future(async move {
            let (writer, reader) = socket.split();
            ConnectionSession::attach(user_id, presence, flags, tuning)
                .await
                .with_shutdown(shutdown)
                .serve(writer, reader)
                .await;
        })
    }))
}
