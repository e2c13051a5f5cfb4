//! Quill: a small blog server that keeps entries in memory, renders them
//! through lazily compiled templates and persists them to one JSON file.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

pub(crate) mod util;
