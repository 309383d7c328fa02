//! HTTP request handlers.

pub mod admin;
pub mod images;

pub use admin::*;
pub use images::*;
