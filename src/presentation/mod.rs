//! Page templates and the helpers bound into them.

pub mod helpers;
pub mod templates;
pub mod views;
