//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod admin;
pub mod health;
pub mod query;

use hkq_core::Language;

use crate::error::AppError;

/// Parse a language tag from a request body
pub(crate) fn parse_language(tag: &str) -> Result<Language, AppError> {
    tag.parse::<Language>().map_err(AppError::from)
}
