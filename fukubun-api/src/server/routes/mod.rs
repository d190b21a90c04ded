use crate::server::{
    Result, ServerError, ServerRouter,
    json::{Done, Json},
};
use axum::Router;
use fukubun_common::model::post::DeleteOutcome;

mod auth;
mod diary;
mod profile;
mod shelf;
mod timeline;
mod tokumei;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(auth::routes())
        .merge(timeline::routes())
        .merge(profile::routes())
        .merge(tokumei::routes())
        .merge(diary::routes())
        .merge(shelf::routes())
}

/// Maps a store deletion to the route's response.
fn deleted(outcome: DeleteOutcome, not_found: ServerError) -> Result<Json<Done>> {
    match outcome {
        DeleteOutcome::Deleted => Ok(Done::OK),
        DeleteOutcome::NotFound => Err(not_found),
        DeleteOutcome::Forbidden => Err(ServerError::Forbidden),
    }
}
