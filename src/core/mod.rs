//! Core logic — values, catalog, resolution, extraction, public operations.

pub mod api;
pub mod catalog;
pub mod digest;
pub mod error;
pub mod extractor;
pub mod library;
pub mod parser;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod types;
pub mod value;
