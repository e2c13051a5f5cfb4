//! Functions exposed to every page template.

use ammonia::Builder as AmmoniaBuilder;
use comrak::{Options, markdown_to_html};
use minijinja::{Environment, Error, ErrorKind, Value};
use once_cell::sync::Lazy;
use time::{
    OffsetDateTime,
    format_description::{BorrowedFormatItem, well_known::Rfc3339},
    macros::format_description,
};

/// `02 Jan 06 15:04 -0700`, independent of the host locale.
const TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[day] [month repr:short] [year repr:last_two] [hour]:[minute] [offset_hour sign:mandatory][offset_minute]"
);

static MARKDOWN_OPTIONS: Lazy<Options<'static>> = Lazy::new(markdown_options);
static SANITIZER: Lazy<AmmoniaBuilder<'static>> = Lazy::new(AmmoniaBuilder::default);

/// Bind the helper set to a template environment.
pub(crate) fn register(env: &mut Environment<'static>) {
    env.add_filter("format_time", format_time_filter);
    env.add_filter("markdown", markdown_filter);
}

pub fn format_time(time: OffsetDateTime) -> Result<String, time::error::Format> {
    time.format(TIME_FORMAT)
}

/// Convert markdown to HTML that is safe to embed in a page.
///
/// Raw HTML in the source is dropped by the parser and the output is passed
/// through the sanitizer, so nothing the author typed reaches the page
/// unescaped.
pub fn markdown_to_safe_html(source: &str) -> String {
    let html = markdown_to_html(source, &MARKDOWN_OPTIONS);
    SANITIZER.clean(&html).to_string()
}

fn format_time_filter(value: &str) -> Result<String, Error> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).map_err(|err| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("`{value}` is not an RFC 3339 timestamp: {err}"),
        )
    })?;
    format_time(parsed).map_err(|err| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("failed to format `{value}`: {err}"),
        )
    })
}

fn markdown_filter(value: &str) -> Value {
    Value::from_safe_string(markdown_to_safe_html(value))
}

fn markdown_options() -> Options<'static> {
    let mut options = Options::default();
    options.parse.smart = true;

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;

    options.render.r#unsafe = false;
    options
}
