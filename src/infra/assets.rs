//! Static asset serving from the configured on-disk directory.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;
use tracing::warn;

use crate::application::error::ErrorReport;

const SOURCE: &str = "infra::assets::serve";

/// Root directory that `/static/` requests are resolved against.
#[derive(Debug, Clone)]
pub struct AssetDirectory {
    root: PathBuf,
}

impl AssetDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve the file at `relative` below the root, or a 404 when it does not
    /// resolve to a regular file inside the root.
    pub async fn serve(&self, relative: &str) -> Response {
        let Some(path) = self.resolve(relative) else {
            return not_found_response();
        };

        match tokio::fs::read(&path).await {
            Ok(contents) => Asset {
                contents: Bytes::from(contents),
                mime: mime_guess::from_path(&path).first_or_octet_stream(),
            }
            .into_response(),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                not_found_response()
            }
            Err(err) => {
                warn!(
                    target = "quill::infra::assets",
                    path = %path.display(),
                    error = %err,
                    "failed to read static asset"
                );
                let mut response = StatusCode::NOT_FOUND.into_response();
                ErrorReport::from_error(SOURCE, StatusCode::NOT_FOUND, &err).attach(&mut response);
                response
            }
        }
    }

    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let candidate = relative.trim_start_matches('/');
        if candidate.is_empty() || candidate.ends_with('/') {
            // No directory listings.
            return None;
        }

        let mut resolved = self.root.clone();
        for component in Path::new(candidate).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

struct Asset {
    contents: Bytes,
    mime: Mime,
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        let len = self.contents.len();
        let mut response = Response::new(Body::from(self.contents));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(self.mime.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600"),
        );

        response
    }
}
