mod login;
mod logout;
mod password;
mod register;
mod users;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use password::{hash_password, verify_password};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(login::auth_page))
        .route("/register", post(register::register))
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
        .route("/me", get(users::me))
        .route("/users", get(users::users))
}
