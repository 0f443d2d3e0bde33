//! Common utilities and types shared across the fieldsync crates.
//!
//! This module provides the error type and the identifier newtypes that the
//! validation, storage and sync layers agree on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{QueueItemId, SurveyId};
