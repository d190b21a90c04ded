use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, Uri, header::InvalidHeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use books::{BookLookup, LookupError};
use fukubun_common::{
    model::{
        Id,
        auth::{AuthTokenHashError, PasswordError},
        diary::{DiaryDate, DiaryForm, DiaryMarker, DiaryRejection, InvalidDiaryDateError},
        post::{CommentRejection, PostMarker},
        shelf::{
            BookFinishedError, BookMarker, InvalidIsbnError, InvalidReadingSecondsError, Isbn,
        },
        user::{InvalidUserHandleError, UserHandle},
    },
    util::PositiveDuration,
};
use fukubun_db::store::{DbError, Store};
use json::Json;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use time::UtcOffset;
use tracing::{debug, error};

mod auth;
pub mod books;
mod json;
mod query;
mod routes;
#[cfg(test)]
mod tests;
mod views;

pub type ServerRouter = Router<ServerState>;

/// Deployment settings every handler may need.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Settings {
    /// Offset used for calendar days and absolute dates.
    pub utc_offset: UtcOffset,
    pub session_ttl: Option<PositiveDuration>,
}

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub books: Arc<dyn BookLookup>,
    pub settings: Settings,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Query rejected: {0}")]
    QueryRejection(#[from] QueryRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Header value could not be built: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("Login required")]
    LoginRequired,
    #[error("Not logged in")]
    Unauthorized,
    #[error("Unknown handle or wrong password")]
    InvalidCredentials,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User {0} was not found.")]
    UserByHandleNotFound(String),
    #[error("Diary with id {0} was not found.")]
    DiaryByIdNotFound(Id<DiaryMarker>),
    #[error("Book with id {0} was not found.")]
    BookByIdNotFound(Id<BookMarker>),
    #[error("No book found for ISBN {0}.")]
    IsbnNotFound(Isbn),
    #[error("You are not allowed to do that")]
    Forbidden,
    #[error("The handle {0} is already taken")]
    HandleTaken(UserHandle),
    #[error(transparent)]
    Comment(#[from] CommentRejection),
    #[error("{rejection}")]
    Diary {
        rejection: DiaryRejection,
        form: DiaryForm,
    },
    #[error("ISBN {0} is already on your shelf")]
    BookAlreadyShelved(Isbn),
    #[error(transparent)]
    BookFinished(#[from] BookFinishedError),
    #[error(transparent)]
    InvalidHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    InvalidIsbn(#[from] InvalidIsbnError),
    #[error(transparent)]
    InvalidReadingSeconds(#[from] InvalidReadingSecondsError),
    #[error(transparent)]
    InvalidDate(#[from] InvalidDiaryDateError),
    #[error("You cannot follow yourself")]
    CannotFollowSelf,
    #[error("A post needs a message or an image")]
    EmptyPost,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByHandleNotFound(_)
            | ServerError::DiaryByIdNotFound(_)
            | ServerError::BookByIdNotFound(_)
            | ServerError::IsbnNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::QueryRejection(_) | ServerError::JsonRejection(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::LoginRequired => StatusCode::SEE_OTHER,
            ServerError::Unauthorized | ServerError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::HandleTaken(_)
            | ServerError::Comment(CommentRejection::AlreadyCommented)
            | ServerError::Diary {
                rejection: DiaryRejection::DateTaken(_),
                ..
            }
            | ServerError::BookAlreadyShelved(_)
            | ServerError::BookFinished(_) => StatusCode::CONFLICT,
            ServerError::Password(PasswordError::TooShort)
            | ServerError::Comment(CommentRejection::Empty)
            | ServerError::Diary { .. }
            | ServerError::InvalidHandle(_)
            | ServerError::InvalidIsbn(_)
            | ServerError::InvalidReadingSeconds(_)
            | ServerError::InvalidDate(_)
            | ServerError::CannotFollowSelf
            | ServerError::EmptyPost => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::JsonResponse(_)
            | ServerError::InvalidHeaderValue(_)
            | ServerError::AuthTokenHash(_)
            | ServerError::Password(PasswordError::Hash(_))
            | ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Lookup(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct ErrorResponse {
    status: u16,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    form: Option<DiaryForm>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            debug!(error = %self, %status, "Replying with error");
        }

        if let ServerError::LoginRequired = self {
            return Redirect::to("/login").into_response();
        }

        // Server-side details stay in the log.
        let message = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_owned()
        } else {
            self.to_string()
        };
        let form = match self {
            ServerError::Diary { form, .. } => Some(form),
            _ => None,
        };

        let error_response = ErrorResponse {
            status: status.as_u16(),
            error: message,
            form,
        };
        (status, Json(error_response)).into_response()
    }
}

impl ServerError {
    pub fn diary(rejection: DiaryRejection, form: DiaryForm) -> Self {
        ServerError::Diary { rejection, form }
    }

    pub fn date_taken(date: DiaryDate, form: DiaryForm) -> Self {
        Self::diary(DiaryRejection::DateTaken(date), form)
    }
}
