use crate::server::{
    Result, ServerError, ServerRouter, Settings,
    auth::{ApiUser, AuthenticatedUser},
    books::BookLookup,
    json::{Created, Json},
    views::{BookView, ShelfOverview, ViewContext},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use fukubun_common::model::{
    Id,
    shelf::{
        Book, BookChange, BookMarker, BookNotes, BookUpdate, Isbn, ReadingSeconds, recently_read,
    },
    user::User,
};
use fukubun_db::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(overview)
        .typed_get(list_books)
        .typed_post(add_book)
        .typed_get(get_book)
        .typed_post(save_notes)
        .typed_post(touch_last_read)
        .typed_post(add_reading_time)
        .typed_post(set_reading_state)
        .typed_post(finish)
}

async fn update(
    store: &dyn Store,
    id: Id<BookMarker>,
    user: &User,
    change: BookChange,
) -> Result<Book> {
    match store.update_book(id, user.id, change).await? {
        BookUpdate::Updated(book) => Ok(book),
        BookUpdate::NotFound => Err(ServerError::BookByIdNotFound(id)),
        BookUpdate::Rejected(err) => Err(err.into()),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/reads", rejection(ServerError))]
struct OverviewPath();

/// Books being read right now and the most recently read ones.
async fn overview(
    OverviewPath(): OverviewPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<ShelfOverview>> {
    let context = ViewContext::new(&user, settings);
    let books = store.fetch_books(user.id).await?;

    Ok(Json(ShelfOverview {
        reading: books
            .iter()
            .filter(|book| book.status.is_reading())
            .map(|book| BookView::new(book, &context))
            .collect(),
        recent: recently_read(&books)
            .into_iter()
            .map(|book| BookView::new(book, &context))
            .collect(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/reads/shelf", rejection(ServerError))]
struct ShelfPath();

async fn list_books(
    ShelfPath(): ShelfPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<BookView>>> {
    let context = ViewContext::new(&user, settings);
    let books = store.fetch_books(user.id).await?;

    Ok(Json(
        books
            .iter()
            .map(|book| BookView::new(book, &context))
            .collect(),
    ))
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct AddBookForm {
    isbn: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/books", rejection(ServerError))]
struct AddBookPath();

async fn add_book(
    AddBookPath(): AddBookPath,
    State(store): State<Arc<dyn Store>>,
    State(books): State<Arc<dyn BookLookup>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(form): Json<AddBookForm>,
) -> Result<Created<BookView>> {
    let isbn: Isbn = form.isbn.parse()?;
    if store.fetch_book_by_isbn(user.id, &isbn).await?.is_some() {
        return Err(ServerError::BookAlreadyShelved(isbn));
    }

    let metadata = books
        .lookup(&isbn)
        .await?
        .ok_or_else(|| ServerError::IsbnNotFound(isbn.clone()))?;

    let context = ViewContext::new(&user, settings);
    let book = store
        .create_book(user.id, &isbn, &metadata, context.now)
        .await?
        .ok_or_else(|| ServerError::BookAlreadyShelved(isbn.clone()))?;
    info!(book = %book.id, %isbn, "Added book to shelf");

    Ok(Created(BookView::new(&book, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}", rejection(ServerError))]
struct BookPath {
    id: Id<BookMarker>,
}

async fn get_book(
    BookPath { id }: BookPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<BookView>> {
    let book = store
        .fetch_book(id, user.id)
        .await?
        .ok_or(ServerError::BookByIdNotFound(id))?;

    let context = ViewContext::new(&user, settings);
    Ok(Json(BookView::new(&book, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}/notes", rejection(ServerError))]
struct NotesPath {
    id: Id<BookMarker>,
}

async fn save_notes(
    NotesPath { id }: NotesPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(notes): Json<BookNotes>,
) -> Result<Json<BookView>> {
    let book = update(&*store, id, &user, BookChange::Notes(notes)).await?;

    let context = ViewContext::new(&user, settings);
    Ok(Json(BookView::new(&book, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}/last_read", rejection(ServerError))]
struct LastReadPath {
    id: Id<BookMarker>,
}

async fn touch_last_read(
    LastReadPath { id }: LastReadPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    ApiUser(user): ApiUser,
) -> Result<Json<BookView>> {
    let context = ViewContext::new(&user, settings);
    let book = update(&*store, id, &user, BookChange::Touch { now: context.now }).await?;

    Ok(Json(BookView::new(&book, &context)))
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct ReadingTimeForm {
    seconds: i64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct ReadingTime {
    total_seconds: u64,
    today_seconds: u64,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}/reading_time", rejection(ServerError))]
struct ReadingTimePath {
    id: Id<BookMarker>,
}

async fn add_reading_time(
    ReadingTimePath { id }: ReadingTimePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    ApiUser(user): ApiUser,
    Json(form): Json<ReadingTimeForm>,
) -> Result<Json<ReadingTime>> {
    let seconds = ReadingSeconds::try_from(form.seconds)?;
    let now = ViewContext::new(&user, settings).now;
    let change = BookChange::AddReadingTime {
        seconds,
        now,
        offset: settings.utc_offset,
    };
    let book = update(&*store, id, &user, change).await?;
    debug!(
        book = %id,
        seconds = seconds.get(),
        total = book.reading.total_seconds,
        "Recorded reading time"
    );

    Ok(Json(ReadingTime {
        total_seconds: book.reading.total_seconds,
        today_seconds: book.reading.today_seconds,
    }))
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct ReadingStateForm {
    reading: bool,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}/reading_state", rejection(ServerError))]
struct ReadingStatePath {
    id: Id<BookMarker>,
}

async fn set_reading_state(
    ReadingStatePath { id }: ReadingStatePath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    ApiUser(user): ApiUser,
    Json(form): Json<ReadingStateForm>,
) -> Result<Json<BookView>> {
    let book = update(&*store, id, &user, BookChange::SetReading(form.reading)).await?;

    let context = ViewContext::new(&user, settings);
    Ok(Json(BookView::new(&book, &context)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/shelf/{id}/finish", rejection(ServerError))]
struct FinishPath {
    id: Id<BookMarker>,
}

async fn finish(
    FinishPath { id }: FinishPath,
    State(store): State<Arc<dyn Store>>,
    State(settings): State<Settings>,
    ApiUser(user): ApiUser,
) -> Result<Json<BookView>> {
    let context = ViewContext::new(&user, settings);
    let book = update(&*store, id, &user, BookChange::Finish { now: context.now }).await?;
    info!(book = %id, "Finished book");

    Ok(Json(BookView::new(&book, &context)))
}
