use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use quill::{
    application::persistence::{MissingFilePolicy, Persistence, PersistenceConfig},
    domain::entries::{EntryDraft, EntryStore},
    infra::{
        assets::AssetDirectory,
        http::{HttpState, build_router},
        storage::JsonFileRepository,
    },
    presentation::templates::TemplateCache,
};
use tempfile::TempDir;
use time::macros::datetime;
use tower::ServiceExt;

struct Harness {
    router: Router,
    entries: Arc<EntryStore>,
    data_file: PathBuf,
    _data_dir: TempDir,
}

fn shipped(dir: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(dir)
}

async fn harness_with(templates: PathBuf, save_on_write: bool) -> Harness {
    harness_writing_to(templates, save_on_write, |dir| dir.join("entries.json")).await
}

async fn harness_writing_to(
    templates: PathBuf,
    save_on_write: bool,
    data_file: impl FnOnce(&Path) -> PathBuf,
) -> Harness {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let data_file = data_file(data_dir.path());

    let persistence = Arc::new(Persistence::new(
        Arc::new(JsonFileRepository::new(data_file.clone())),
        PersistenceConfig {
            missing_file: MissingFilePolicy::StartEmpty,
            save_on_write,
            save_timeout: Duration::from_secs(5),
        },
    ));
    let entries = Arc::new(persistence.load().await.expect("load empty store"));
    persistence.mark_running().expect("running");

    let router = build_router(HttpState {
        entries: entries.clone(),
        templates: Arc::new(TemplateCache::new(templates)),
        persistence,
        assets: Arc::new(AssetDirectory::new(shipped("static"))),
    });

    Harness {
        router,
        entries,
        data_file,
        _data_dir: data_dir,
    }
}

async fn harness() -> Harness {
    harness_with(shipped("templates"), false).await
}

async fn get(router: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn post_form(router: &Router, body: &'static str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/submit/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header")
}

#[tokio::test]
async fn index_without_entries_renders_no_entry_markup() {
    let harness = harness().await;

    let response = get(&harness.router, "/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(!body.contains("<article"));
    assert!(body.contains("Nothing has been written yet."));
}

#[tokio::test]
async fn submit_form_is_rendered() {
    let harness = harness().await;

    let response = get(&harness.router, "/submit/").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    assert!(body.contains(r#"name="title""#));
    assert!(body.contains(r#"name="content""#));
}

#[tokio::test]
async fn posting_an_entry_redirects_home_and_shows_it() {
    let harness = harness().await;

    let response = post_form(&harness.router, "title=Hello&content=some+**bold**+words").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");

    assert_eq!(harness.entries.len(), 1);
    let entry = harness.entries.get(1).expect("entry with id 1");
    assert_eq!(entry.title, "Hello");

    let body = body_text(get(&harness.router, "/").await).await;
    assert!(body.contains("<h2>Hello</h2>"));
    assert!(body.contains("<strong>bold</strong>"));
}

#[tokio::test]
async fn submit_without_trailing_slash_redirects_permanently() {
    let harness = harness().await;

    let response = get(&harness.router, "/submit").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location(&response), "/submit/");
}

#[tokio::test]
async fn unreadable_form_redirects_back_without_creating() {
    let harness = harness().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/submit/")
        .body(Body::from("title=Hello&content=world"))
        .expect("request should build");
    let response = harness
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/submit/");
    assert!(harness.entries.is_empty());
}

#[tokio::test]
async fn blank_title_redirects_back_without_creating() {
    let harness = harness().await;

    let response = post_form(&harness.router, "title=&content=orphaned").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/submit/");
    assert!(harness.entries.is_empty());

    let response = post_form(&harness.router, "content=no+title+at+all").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/submit/");
    assert!(harness.entries.is_empty());
}

#[tokio::test]
async fn index_lists_newest_entry_first() {
    let harness = harness().await;
    harness.entries.add(
        EntryDraft::new("Hello", "first").expect("draft"),
        datetime!(2024-01-01 10:00 UTC),
    );
    harness.entries.add(
        EntryDraft::new("Second", "later").expect("draft"),
        datetime!(2024-01-02 10:00 UTC),
    );

    let body = body_text(get(&harness.router, "/").await).await;
    let second = body.find("Second").expect("second entry rendered");
    let hello = body.find("Hello").expect("first entry rendered");
    assert!(second < hello);
    assert!(body.contains("02 Jan 24 10:00 +0000"));
}

#[tokio::test]
async fn titles_are_escaped() {
    let harness = harness().await;
    harness.entries.add(
        EntryDraft::new("<script>alert(1)</script>", "body").expect("draft"),
        datetime!(2024-01-01 10:00 UTC),
    );

    let body = body_text(get(&harness.router, "/").await).await;
    assert!(!body.contains("<script>alert(1)</script>"));
    assert!(body.contains("&lt;script&gt;"));
}

#[tokio::test]
async fn broken_template_yields_internal_server_error() {
    let templates = tempfile::tempdir().expect("tempdir");
    std::fs::write(templates.path().join("main.html"), "{% for entry in %}").expect("write");
    let harness = harness_with(templates.path().to_path_buf(), false).await;

    let response = get(&harness.router, "/").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Internal server error");

    // The server keeps answering other routes.
    let response = get(&harness.router, "/static/style.css").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn static_files_are_served_with_content_type() {
    let harness = harness().await;

    let response = get(&harness.router, "/static/style.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/css"
    );
}

#[tokio::test]
async fn static_traversal_is_not_found() {
    let harness = harness().await;

    for uri in [
        "/static/../Cargo.toml",
        "/static/%2e%2e/Cargo.toml",
        "/static/missing.css",
    ] {
        let response = get(&harness.router, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "uri: {uri}");
    }
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let harness = harness().await;

    for uri in ["/nope", "/submit/extra", "/posts/1"] {
        let response = get(&harness.router, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "uri: {uri}");
    }
}

#[tokio::test]
async fn save_on_write_persists_each_new_entry() {
    let harness = harness_with(shipped("templates"), true).await;

    let response = post_form(&harness.router, "title=Kept&content=on+disk").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let written = std::fs::read_to_string(&harness.data_file).expect("data file written");
    assert!(written.contains(r#""title": "Kept""#));
}

#[tokio::test]
async fn entries_are_not_written_before_shutdown_by_default() {
    let harness = harness().await;

    let response = post_form(&harness.router, "title=Volatile&content=memory").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    assert!(!harness.data_file.exists());
}

#[tokio::test]
async fn failed_save_on_write_answers_with_server_error() {
    let harness = harness_writing_to(shipped("templates"), true, |dir| {
        dir.join("data").join("entries.json")
    })
    .await;
    let data_dir = harness.data_file.parent().expect("data directory");
    std::fs::write(data_dir, "a file where the directory should be").expect("write");

    let response = post_form(&harness.router, "title=Unsaved&content=memory+only").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_text(response).await,
        "Entry created but could not be saved"
    );

    // The entry is still served from memory.
    assert_eq!(harness.entries.len(), 1);
    let body = body_text(get(&harness.router, "/").await).await;
    assert!(body.contains("<h2>Unsaved</h2>"));
}
