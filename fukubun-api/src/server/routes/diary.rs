use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::AuthenticatedUser,
    json::{Created, Done, Json},
    query::Query,
    routes::deleted,
    views::{DiaryView, ViewContext},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::{
    Id,
    diary::{DiaryDate, DiaryEntry, DiaryForm, DiaryMarker, DiaryWrite},
};
use fukubun_db::store::Store;
use serde::Deserialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_diaries)
        .typed_post(create_diary)
        .typed_get(public_calendar)
        .typed_get(own_calendar)
        .typed_get(get_diary)
        .typed_post(edit_diary)
        .typed_post(delete_diary)
}

/// Validates the form, keeping it around for the error response.
fn validate(form: DiaryForm) -> Result<(DiaryEntry, DiaryForm)> {
    match form.validate() {
        Ok(entry) => Ok((entry, form)),
        Err(rejection) => Err(ServerError::diary(rejection, form)),
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct DiaryQuery {
    #[serde(default)]
    date: Option<String>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary", rejection(ServerError))]
struct DiariesPath();

async fn list_diaries(
    DiariesPath(): DiariesPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<DiaryQuery>,
) -> Result<Json<Vec<DiaryView>>> {
    let date = query
        .date
        .filter(|date| !date.is_empty())
        .map(|date| date.parse::<DiaryDate>())
        .transpose()?;

    let context = ViewContext::new(&user, settings);
    let diaries = store.fetch_visible_diaries(&context.viewer, date).await?;

    Ok(Json(
        diaries
            .iter()
            .map(|diary| DiaryView::new(diary, &context))
            .collect(),
    ))
}

async fn create_diary(
    DiariesPath(): DiariesPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(form): Json<DiaryForm>,
) -> Result<Created<DiaryView>> {
    let (entry, form) = validate(form)?;
    let context = ViewContext::new(&user, settings);

    match store.create_diary(user.id, &entry, context.now).await? {
        DiaryWrite::Written(diary) => {
            debug!(diary = %diary.id, date = %diary.date, "Created diary");
            Ok(Created(DiaryView::new(&diary, &context)))
        }
        DiaryWrite::DateTaken => Err(ServerError::date_taken(entry.date, form)),
        DiaryWrite::NotFound | DiaryWrite::Forbidden => Err(ServerError::Forbidden),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary/calendar", rejection(ServerError))]
struct PublicCalendarPath();

/// Number of public entries per date.
async fn public_calendar(
    PublicCalendarPath(): PublicCalendarPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(_): AuthenticatedUser,
) -> Result<Json<BTreeMap<DiaryDate, u64>>> {
    Ok(Json(store.fetch_public_diary_counts().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary/my", rejection(ServerError))]
struct OwnCalendarPath();

async fn own_calendar(
    OwnCalendarPath(): OwnCalendarPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<BTreeMap<DiaryDate, Id<DiaryMarker>>>> {
    let diaries = store.fetch_user_diaries(user.id).await?;

    Ok(Json(
        diaries
            .into_iter()
            .map(|diary| (diary.date, diary.id))
            .collect(),
    ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary/{id}", rejection(ServerError))]
struct DiaryPath {
    id: Id<DiaryMarker>,
}

async fn get_diary(
    DiaryPath { id }: DiaryPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<DiaryView>> {
    let context = ViewContext::new(&user, settings);
    // Someone else's private entry looks exactly like a missing one.
    let diary = store
        .fetch_diary(id)
        .await?
        .filter(|diary| diary.visible_to(&context.viewer))
        .ok_or(ServerError::DiaryByIdNotFound(id))?;

    Ok(Json(DiaryView::new(&diary, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary/{id}/edit", rejection(ServerError))]
struct EditDiaryPath {
    id: Id<DiaryMarker>,
}

async fn edit_diary(
    EditDiaryPath { id }: EditDiaryPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(form): Json<DiaryForm>,
) -> Result<Json<DiaryView>> {
    let (entry, form) = validate(form)?;
    let context = ViewContext::new(&user, settings);

    match store
        .update_diary(id, &context.viewer, &entry, context.now)
        .await?
    {
        DiaryWrite::Written(diary) => Ok(Json(DiaryView::new(&diary, &context))),
        DiaryWrite::DateTaken => Err(ServerError::date_taken(entry.date, form)),
        DiaryWrite::NotFound => Err(ServerError::DiaryByIdNotFound(id)),
        DiaryWrite::Forbidden => Err(ServerError::Forbidden),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/diary/{id}/delete", rejection(ServerError))]
struct DeleteDiaryPath {
    id: Id<DiaryMarker>,
}

async fn delete_diary(
    DeleteDiaryPath { id }: DeleteDiaryPath,
    State(store): State<Arc<dyn Store>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Done>> {
    let outcome = store.delete_diary(id, &user.viewer()).await?;

    deleted(outcome, ServerError::DiaryByIdNotFound(id))
}
