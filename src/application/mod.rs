//! Application services: persistence lifecycle, repository seams and HTTP error types.

pub mod error;
pub mod persistence;
pub mod repos;
