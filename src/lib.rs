//! Live train positions from an encrypted provider feed, turned into a
//! static site model.
//!
//! A run goes decoder -> station and train normalizers (which derive each
//! stop's status) -> site builder -> emission. Each stage is a pure mapping
//! over its input and either completes for the whole batch or fails it.

pub mod config;
pub mod decoder;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod raw_types;
pub mod site;
pub mod stations;
pub mod status;
pub mod trains;

pub use error::{Error, Result, TimestampField};
