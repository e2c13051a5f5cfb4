use std::sync::Arc;

use axum::{
    Form, Router,
    body::Body,
    extract::{Path, State, rejection::FormRejection},
    http::{HeaderValue, Request, StatusCode, header::LOCATION},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    application::{
        error::{ErrorReport, HttpError},
        persistence::Persistence,
    },
    domain::entries::{EntryDraft, EntryStore},
    infra::assets::AssetDirectory,
    presentation::{
        templates::TemplateCache,
        views::{IndexView, MAIN_TEMPLATE, SUBMIT_TEMPLATE, SubmitView, render_page_response},
    },
};

use super::middleware::{log_responses, set_request_context};

const INDEX_PATH: &str = "/";
const SUBMIT_PATH: &str = "/submit/";
const SUBMIT_PATH_BARE: &str = "/submit";

#[derive(Clone)]
pub struct HttpState {
    pub entries: Arc<EntryStore>,
    pub templates: Arc<TemplateCache>,
    pub persistence: Arc<Persistence>,
    pub assets: Arc<AssetDirectory>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(INDEX_PATH, get(index))
        .route(SUBMIT_PATH, get(submit_form).post(submit_entry))
        .route(SUBMIT_PATH_BARE, get(add_trailing_slash).post(add_trailing_slash))
        .route("/static/{*path}", get(serve_static))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Fields posted by the submission form. Absent fields deserialize as empty
/// and are rejected by validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitForm {
    pub title: String,
    pub content: String,
}

async fn index(State(state): State<HttpState>) -> Response {
    let view = IndexView {
        entries: state.entries.all_by_date(),
    };
    render_page_response(&state.templates, MAIN_TEMPLATE, view, StatusCode::OK).await
}

async fn submit_form(State(state): State<HttpState>) -> Response {
    render_page_response(
        &state.templates,
        SUBMIT_TEMPLATE,
        SubmitView::default(),
        StatusCode::OK,
    )
    .await
}

async fn add_trailing_slash() -> Response {
    redirect(StatusCode::MOVED_PERMANENTLY, SUBMIT_PATH)
}

async fn submit_entry(
    State(state): State<HttpState>,
    form: Result<Form<SubmitForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            debug!(
                target = "quill::http::submit",
                reason = %rejection,
                "unreadable submission"
            );
            return found(SUBMIT_PATH);
        }
    };

    let draft = match EntryDraft::new(form.title, form.content) {
        Ok(draft) => draft,
        Err(err) => {
            debug!(
                target = "quill::http::submit",
                reason = %err,
                "rejected submission"
            );
            return found(SUBMIT_PATH);
        }
    };

    let entry = state.entries.add(draft, OffsetDateTime::now_utc());
    info!(
        target = "quill::http::submit",
        id = entry.id,
        title = %entry.title,
        "entry created"
    );

    if let Err(err) = state.persistence.after_write(&state.entries).await {
        return HttpError::from_error(
            "infra::http::public::submit_entry",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Entry created but could not be saved",
            &err,
        )
        .into_response();
    }

    found(INDEX_PATH)
}

async fn serve_static(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    state.assets.serve(&path).await
}

async fn not_found(request: Request<Body>) -> Response {
    let mut response = (StatusCode::NOT_FOUND, "Not Found").into_response();
    ErrorReport::from_message(
        "infra::http::public::not_found",
        StatusCode::NOT_FOUND,
        format!("no route for `{}`", request.uri().path()),
    )
    .attach(&mut response);
    response
}

/// `302 Found` redirect; axum's `Redirect` helpers only emit 303/307/308.
fn found(location: &'static str) -> Response {
    redirect(StatusCode::FOUND, location)
}

fn redirect(status: StatusCode, location: &'static str) -> Response {
    let mut response = status.into_response();
    response
        .headers_mut()
        .insert(LOCATION, HeaderValue::from_static(location));
    response
}
