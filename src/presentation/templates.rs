//! Lazily compiled page templates.
//!
//! Templates are read from disk on first use and memoized by name for the
//! lifetime of the cache. Each name owns a once-cell slot: concurrent first
//! renders wait on a single compilation, and a failed compilation leaves the
//! slot empty so the next render tries again.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use metrics::counter;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;
use tokio::{fs, sync::OnceCell};
use tracing::{debug, warn};

use crate::util::lock::mutex_lock;

use super::helpers;

const SOURCE: &str = "presentation::templates";
const METRIC_TEMPLATE_COMPILE: &str = "quill_template_compile_total";
const METRIC_TEMPLATE_COMPILE_FAILURES: &str = "quill_template_compile_failures_total";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` failed to compile: {message}")]
    Compile { name: String, message: String },
    #[error("template `{name}` failed to render: {message}")]
    Execution { name: String, message: String },
}

impl TemplateError {
    fn compile(name: &str, message: impl ToString) -> Self {
        Self::Compile {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn execution(name: &str, message: impl ToString) -> Self {
        Self::Execution {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// A compiled template together with the helper functions it was bound to.
pub struct TemplateHandle {
    name: String,
    env: Environment<'static>,
}

impl TemplateHandle {
    fn compile(name: &str, source: String) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        helpers::register(&mut env);
        env.add_template_owned(name.to_string(), source)?;

        Ok(Self {
            name: name.to_string(),
            env,
        })
    }

    fn render<S: Serialize, W: Write>(&self, data: S, writer: W) -> Result<(), minijinja::Error> {
        let template = self.env.get_template(&self.name)?;
        template.render_to_write(data, writer)?;
        Ok(())
    }
}

type Slot = Arc<OnceCell<Arc<TemplateHandle>>>;

/// Insert-only cache of compiled templates keyed by file name.
pub struct TemplateCache {
    directory: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TemplateCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Render `name` with `data` into `writer`, compiling it first if needed.
    ///
    /// Execution failures are scoped to this call; the compiled handle stays
    /// cached.
    pub async fn render<S, W>(&self, name: &str, data: S, writer: W) -> Result<(), TemplateError>
    where
        S: Serialize,
        W: Write,
    {
        let handle = self.handle(name).await?;
        handle
            .render(data, writer)
            .map_err(|err| TemplateError::execution(name, err))
    }

    pub async fn render_to_string<S: Serialize>(
        &self,
        name: &str,
        data: S,
    ) -> Result<String, TemplateError> {
        let mut buffer = Vec::new();
        self.render(name, data, &mut buffer).await?;
        String::from_utf8(buffer).map_err(|err| TemplateError::execution(name, err))
    }

    /// Whether `name` currently has a compiled handle.
    pub fn is_compiled(&self, name: &str) -> bool {
        mutex_lock(&self.slots, SOURCE, "is_compiled")
            .get(name)
            .is_some_and(|slot| slot.initialized())
    }

    async fn handle(&self, name: &str) -> Result<Arc<TemplateHandle>, TemplateError> {
        let slot = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "handle");
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        slot.get_or_try_init(|| self.compile(name))
            .await
            .map(Arc::clone)
    }

    async fn compile(&self, name: &str) -> Result<Arc<TemplateHandle>, TemplateError> {
        let started = Instant::now();
        counter!(METRIC_TEMPLATE_COMPILE).increment(1);

        let result = self.read_and_compile(name).await;
        match &result {
            Ok(_) => debug!(
                target = "quill::templates",
                template = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compiled template"
            ),
            Err(err) => {
                counter!(METRIC_TEMPLATE_COMPILE_FAILURES).increment(1);
                warn!(
                    target = "quill::templates",
                    template = name,
                    error = %err,
                    "template compilation failed; next render will retry"
                );
            }
        }
        result
    }

    async fn read_and_compile(&self, name: &str) -> Result<Arc<TemplateHandle>, TemplateError> {
        if !is_plain_name(name) {
            return Err(TemplateError::compile(name, "invalid template name"));
        }

        let path = self.directory.join(name);
        let source = fs::read_to_string(&path).await.map_err(|err| {
            TemplateError::compile(name, format!("failed to read `{}`: {err}", path.display()))
        })?;

        TemplateHandle::compile(name, source)
            .map(Arc::new)
            .map_err(|err| TemplateError::compile(name, err))
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use tempfile::TempDir;

    use super::*;

    #[derive(Serialize)]
    struct Greeting<'a> {
        name: &'a str,
    }

    fn cache_with(files: &[(&str, &str)]) -> (TempDir, TemplateCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).expect("write template");
        }
        let cache = TemplateCache::new(dir.path());
        (dir, cache)
    }

    #[tokio::test]
    async fn compiles_on_first_use_and_reuses_handle() {
        let (dir, cache) = cache_with(&[("hello.html", "Hello {{ name }}!")]);
        assert!(!cache.is_compiled("hello.html"));

        let first = cache
            .render_to_string("hello.html", Greeting { name: "Ada" })
            .await
            .expect("render");
        assert_eq!(first, "Hello Ada!");
        assert!(cache.is_compiled("hello.html"));

        // The source is no longer consulted once compiled.
        std::fs::write(dir.path().join("hello.html"), "changed").expect("rewrite");
        let second = cache
            .render_to_string("hello.html", Greeting { name: "Grace" })
            .await
            .expect("render");
        assert_eq!(second, "Hello Grace!");
    }

    #[tokio::test]
    async fn failed_compilation_is_retried() {
        let (dir, cache) = cache_with(&[("broken.html", "{% for %}")]);

        let err = cache
            .render_to_string("broken.html", ())
            .await
            .expect_err("syntax error");
        assert!(matches!(err, TemplateError::Compile { .. }));
        assert!(!cache.is_compiled("broken.html"));

        std::fs::write(dir.path().join("broken.html"), "fixed").expect("rewrite");
        let rendered = cache
            .render_to_string("broken.html", ())
            .await
            .expect("retry compiles");
        assert_eq!(rendered, "fixed");
    }

    #[tokio::test]
    async fn missing_template_is_a_compile_error() {
        let (_dir, cache) = cache_with(&[]);
        let err = cache
            .render_to_string("absent.html", ())
            .await
            .expect_err("missing file");
        assert!(matches!(err, TemplateError::Compile { .. }));
    }

    #[tokio::test]
    async fn path_like_names_are_refused() {
        let (_dir, cache) = cache_with(&[]);
        let err = cache
            .render_to_string("../secret.html", ())
            .await
            .expect_err("traversal");
        assert!(matches!(err, TemplateError::Compile { .. }));
    }

    #[tokio::test]
    async fn execution_failure_keeps_cached_handle() {
        let (_dir, cache) = cache_with(&[("greet.html", "Hi {{ name }}")]);

        let err = cache
            .render_to_string("greet.html", ())
            .await
            .expect_err("missing field");
        assert!(matches!(err, TemplateError::Execution { .. }));
        assert!(cache.is_compiled("greet.html"));

        let rendered = cache
            .render_to_string("greet.html", Greeting { name: "Linus" })
            .await
            .expect("render");
        assert_eq!(rendered, "Hi Linus");
    }

    #[tokio::test]
    async fn values_are_escaped_but_markdown_is_not() {
        let (_dir, cache) =
            cache_with(&[("post.html", "<h1>{{ title }}</h1>{{ body | markdown }}")]);

        #[derive(Serialize)]
        struct Post<'a> {
            title: &'a str,
            body: &'a str,
        }

        let rendered = cache
            .render_to_string(
                "post.html",
                Post {
                    title: "<script>x</script>",
                    body: "*em*",
                },
            )
            .await
            .expect("render");

        assert!(rendered.contains("&lt;script&gt;"));
        assert!(rendered.contains("<em>em</em>"));
    }

    #[tokio::test]
    async fn concurrent_first_use_yields_one_handle() {
        let (_dir, cache) = cache_with(&[("shared.html", "{{ name }}")]);
        let cache = Arc::new(cache);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .handle("shared.html")
                        .await
                        .map(|handle| Arc::as_ptr(&handle) as usize)
                })
            })
            .collect();

        let mut pointers = Vec::new();
        for task in tasks {
            pointers.push(task.await.expect("task").expect("compile"));
        }
        pointers.dedup();
        assert_eq!(pointers.len(), 1);
    }
}
