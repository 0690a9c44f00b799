//! Invoice domain: data model, validation, numbering, amount formatting and
//! the HTTP handlers that expose them.

pub mod format;
pub mod handlers;
pub mod models;
pub mod numbering;
pub mod validation;

pub use handlers::config;
