//! Command handlers, grouped by category.
//!
//! Each handler takes the resolved migration and the command's fields and
//! returns the command's documented `Output` variant.

pub mod pattern;
pub mod repair;
pub mod validation;
