//! Infrastructure layer: background processing behind the admin API.

pub mod linking;
