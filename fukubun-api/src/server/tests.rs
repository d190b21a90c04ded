use crate::server::{
    ServerState, Settings,
    books::{BookLookup, LookupError},
    routes,
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use fukubun_common::model::shelf::{BookMetadata, Isbn};
use fukubun_db::memory::MemoryStore;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use time::macros::offset;
use tower::ServiceExt;

const KNOWN_ISBN: &str = "9784101010014";

struct StubBooks;

#[async_trait]
impl BookLookup for StubBooks {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookMetadata>, LookupError> {
        Ok((isbn.get() == KNOWN_ISBN).then(|| BookMetadata {
            title: "こころ".to_owned(),
            authors: "夏目漱石".to_owned(),
            thumbnail: String::new(),
        }))
    }
}

struct TestApp {
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let state = ServerState {
            store: Arc::new(MemoryStore::default()),
            books: Arc::new(StubBooks),
            settings: Settings {
                utc_offset: offset!(+9),
                session_ttl: None,
            },
        };

        Self {
            router: routes().with_state(state),
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&body).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, json)
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Signs up a new user and returns their session token.
    async fn signup(&self, handle: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/signup",
                None,
                Some(json!({ "handle": handle, "password": "hunter22" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        body["token"].as_str().unwrap().to_owned()
    }
}

fn id(body: &Value) -> String {
    body["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn pages_redirect_anonymous_visitors_to_login() {
    let app = TestApp::new();

    let request = Request::builder()
        .uri("/timeline")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/login");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::new();
    let token = app.signup("hanako").await;

    let (status, body) = app.get("/nowhere", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn login_and_logout() {
    let app = TestApp::new();
    app.signup("hanako").await;

    let (status, _) = app
        .send(
            Method::POST,
            "/signup",
            None,
            Some(json!({ "handle": "hanako", "password": "other-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, wrong_password) = app
        .send(
            Method::POST,
            "/login",
            None,
            Some(json!({ "handle": "hanako", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, unknown_handle) = app
        .send(
            Method::POST,
            "/login",
            None,
            Some(json!({ "handle": "taro", "password": "wrong" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_handle, wrong_password);

    let (status, body) = app
        .send(
            Method::POST,
            "/login",
            None,
            Some(json!({ "handle": "hanako", "password": "hunter22" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_owned();

    let (status, _) = app.get("/timeline", &token).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(Method::POST, "/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/timeline", &token).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn like_toggle_counts_the_set() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (status, post) = app
        .post("/timeline", &alice, json!({ "message": "おはよう" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let like = format!("/like/{}", id(&post));

    let (status, _) = app.send(Method::POST, &like, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, toggle) = app.post(&like, &bob, json!({})).await;
    assert_eq!(toggle, json!({ "likes": 1, "is_liked": true }));
    let (_, toggle) = app.post(&like, &alice, json!({})).await;
    assert_eq!(toggle, json!({ "likes": 2, "is_liked": true }));
    let (_, toggle) = app.post(&like, &bob, json!({})).await;
    assert_eq!(toggle, json!({ "likes": 1, "is_liked": false }));

    let (_, timeline) = app.get("/timeline", &bob).await;
    assert_eq!(timeline[0]["likes"], 1);
    assert_eq!(timeline[0]["is_liked"], false);
    assert_eq!(timeline[0]["author"]["handle"], "alice");

    let (status, _) = app.post("/like/1", &bob, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn one_comment_per_user() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (_, post) = app
        .post("/timeline", &alice, json!({ "message": "hello" }))
        .await;
    let comment = format!("/comment/{}", id(&post));

    let (status, _) = app.post(&comment, &bob, json!({ "message": "   " })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, created) = app
        .post(&comment, &bob, json!({ "message": "  nice  " }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["message"], "nice  ");

    let (status, _) = app.post(&comment, &bob, json!({ "message": "again" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, detail) = app.get(&format!("/timeline/{}", id(&post)), &bob).await;
    assert_eq!(detail["already_commented"], true);
    assert_eq!(detail["comments"].as_array().unwrap().len(), 1);

    let remove = format!("/comment/{}/{}/delete", id(&post), id(&created));
    let (_, removal) = app.post(&remove, &alice, json!({})).await;
    assert_eq!(removal["removed"], false);
    let (_, removal) = app.post(&remove, &bob, json!({})).await;
    assert_eq!(removal["removed"], true);
}

#[tokio::test]
async fn anonymous_posts_hide_their_author() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (status, post) = app
        .post(
            "/tokumei",
            &alice,
            json!({ "title": "  ", "message": "secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(post["title"], Value::Null);

    let (_, own) = app.get("/tokumei", &alice).await;
    assert_eq!(own[0]["deletable"], true);
    let (_, foreign) = app.get("/tokumei", &bob).await;
    assert_eq!(foreign[0]["deletable"], false);
    assert!(foreign[0].get("author").is_none());
    assert!(!foreign.to_string().contains("alice"));

    let delete = format!("/tokumei/{}/delete", id(&post));
    let (status, _) = app.post(&delete, &bob, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.post(&delete, &alice, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.post(&delete, &alice, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn view_log_save_and_review() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (_, novel) = app
        .post(
            "/tokumei_novel",
            &alice,
            json!({ "title": "第一章", "message": "むかしむかし" }),
        )
        .await;
    let novel_id = id(&novel);

    let (status, _) = app.get(&format!("/tokumei/{novel_id}"), &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for _ in 0..2 {
        let (status, _) = app.get(&format!("/tokumei_novel/{novel_id}"), &bob).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, log) = app.get("/tokumei_log", &bob).await;
    assert_eq!(log.as_array().unwrap().len(), 2);

    let (status, _) = app
        .post(&format!("/tokumei_log/{novel_id}/delete"), &bob, json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, log) = app.get("/tokumei_log", &bob).await;
    assert_eq!(log.as_array().unwrap().len(), 1);

    app.post("/tokumei_log/clear", &bob, json!({})).await;
    let (_, log) = app.get("/tokumei_log", &bob).await;
    assert_eq!(log, json!([]));

    app.post(&format!("/tokumei_save/{novel_id}"), &bob, json!({}))
        .await;
    let (_, saved) = app.get("/tokumei_save", &bob).await;
    assert_eq!(saved[0]["is_saved"], true);
    app.post(&format!("/tokumei_save/{novel_id}/remove"), &bob, json!({}))
        .await;
    let (_, saved) = app.get("/tokumei_save", &bob).await;
    assert_eq!(saved, json!([]));

    for rating in ["good", "great"] {
        let (status, _) = app
            .post(
                "/tokumei_review",
                &bob,
                json!({ "post_id": novel_id, "rating": rating }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, reviews) = app.get("/tokumei_review", &bob).await;
    assert_eq!(reviews.as_array().unwrap().len(), 1);
    assert_eq!(reviews[0]["rating"], "great");
}

#[tokio::test]
async fn private_diaries_look_missing_to_others() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (status, diary) = app
        .post(
            "/diary",
            &alice,
            json!({
                "title": "日記",
                "content": "today",
                "date": "2025年1月20日",
                "is_public": false,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(diary["date"], "2025-01-20");
    let path = format!("/diary/{}", id(&diary));

    let (status, own) = app.get(&path, &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(own["is_mine"], true);

    let (status, hidden) = app.get(&path, &bob).await;
    let (missing_status, missing) = app.get("/diary/1", &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing_status, StatusCode::NOT_FOUND);
    assert_eq!(hidden["status"], missing["status"]);

    let (status, _) = app
        .post(
            &format!("{path}/delete"),
            &bob,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = app.get("/diary?date=2025-01-20", &bob).await;
    assert_eq!(listed, json!([]));
    let (_, listed) = app.get("/diary?date=2025-01-20", &alice).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, calendar) = app.get("/diary/calendar", &bob).await;
    assert_eq!(calendar, json!({}));
    let (_, mine) = app.get("/diary/my", &alice).await;
    assert_eq!(mine["2025-01-20"], id(&diary));

    let (status, _) = app.get("/diary?date=yesterday", &alice).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn diary_conflicts_echo_the_form() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;

    let form = json!({
        "title": "",
        "content": "first",
        "date": "2025-02-01",
        "is_public": true,
    });
    let (status, _) = app.post("/diary", &alice, form).await;
    assert_eq!(status, StatusCode::CREATED);

    let again = json!({
        "title": "two",
        "content": "second",
        "date": "2025年2月1日",
        "is_public": true,
    });
    let (status, body) = app.post("/diary", &alice, again).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["form"]["content"], "second");
    assert_eq!(body["form"]["date"], "2025年2月1日");

    let empty = json!({ "content": "   ", "date": "2025-02-02" });
    let (status, body) = app.post("/diary", &alice, empty).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["form"]["date"], "2025-02-02");

    let (_, calendar) = app.get("/diary/calendar", &alice).await;
    assert_eq!(calendar, json!({ "2025-02-01": 1 }));
}

#[tokio::test]
async fn shelf_tracks_reading_time() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;

    let (status, book) = app
        .post("/books", &alice, json!({ "isbn": "978-4-10-101001-4" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(book["title"], "こころ");
    assert_eq!(book["state"], "idle");
    let book_id = id(&book);

    let (status, _) = app
        .post("/books", &alice, json!({ "isbn": KNOWN_ISBN }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .post("/books", &alice, json!({ "isbn": "9780000000000" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .post("/books", &alice, json!({ "isbn": "not an isbn" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let reading_time = format!("/shelf/{book_id}/reading_time");
    let (status, _) = app
        .send(
            Method::POST,
            &reading_time,
            None,
            Some(json!({ "seconds": 30 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.post(&reading_time, &alice, json!({ "seconds": 0 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    app.post(&reading_time, &alice, json!({ "seconds": 30 }))
        .await;
    let (status, time) = app.post(&reading_time, &alice, json!({ "seconds": 45 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(time, json!({ "total_seconds": 75, "today_seconds": 75 }));

    let state = format!("/shelf/{book_id}/reading_state");
    let (_, reading) = app.post(&state, &alice, json!({ "reading": true })).await;
    assert_eq!(reading["state"], "reading");
    let (_, overview) = app.get("/reads", &alice).await;
    assert_eq!(overview["reading"][0]["id"], book_id);
    assert_eq!(overview["recent"][0]["id"], book_id);

    let (_, finished) = app
        .post(&format!("/shelf/{book_id}/finish"), &alice, json!({}))
        .await;
    assert_eq!(finished["state"], "finished");
    let (status, _) = app.post(&state, &alice, json!({ "reading": true })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let bob = app.signup("bob").await;
    let (status, _) = app.get(&format!("/shelf/{book_id}"), &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn follow_and_profiles() {
    let app = TestApp::new();
    let alice = app.signup("alice").await;
    let bob = app.signup("bob").await;

    let (status, _) = app.post("/follow/alice", &alice, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = app.post("/follow/nobody", &alice, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, state) = app.post("/follow/alice", &bob, json!({})).await;
    assert_eq!(state["is_following"], true);
    assert_eq!(state["followers"], 1);

    let (_, profile) = app.get("/profile/alice", &bob).await;
    assert_eq!(profile["is_following"], true);
    assert_eq!(profile["is_me"], false);

    let (_, own) = app.get("/profile", &alice).await;
    assert_eq!(own["followers"], 1);
    assert!(own.get("is_following").is_none());

    let (_, edited) = app
        .post(
            "/profile/edit",
            &alice,
            json!({ "name": "Alice", "bio": "本が好き", "icon": "/images/a.png" }),
        )
        .await;
    assert_eq!(edited["name"], "Alice");
    assert_eq!(edited["icon"], "/images/a.png");

    let (_, state) = app.post("/unfollow/alice", &bob, json!({})).await;
    assert_eq!(state["followers"], 0);
}
