use crate::state::AppState;
use axum::Router;

mod claims;
mod codes;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod otp;
pub mod otp_repo;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
