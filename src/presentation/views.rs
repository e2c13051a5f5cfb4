use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    application::error::HttpError,
    domain::entries::Entry,
    presentation::templates::{TemplateCache, TemplateError},
};

pub const MAIN_TEMPLATE: &str = "main.html";
pub const SUBMIT_TEMPLATE: &str = "submit.html";

/// Context for the front page.
#[derive(Debug, Serialize)]
pub struct IndexView {
    pub entries: Vec<Entry>,
}

/// Context for the submission form. Carries nothing today; kept as a struct so
/// templates always receive a map.
#[derive(Debug, Default, Serialize)]
pub struct SubmitView {}

impl From<TemplateError> for HttpError {
    fn from(err: TemplateError) -> Self {
        HttpError::from_error(
            "presentation::views::render_page",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            &err,
        )
    }
}

pub async fn render_page<S: Serialize>(
    templates: &TemplateCache,
    name: &str,
    view: S,
) -> Result<Html<String>, HttpError> {
    templates
        .render_to_string(name, view)
        .await
        .map(Html)
        .map_err(HttpError::from)
}

pub async fn render_page_response<S: Serialize>(
    templates: &TemplateCache,
    name: &str,
    view: S,
    status: StatusCode,
) -> Response {
    match render_page(templates, name, view).await {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}
