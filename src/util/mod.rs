//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **Text cleanup**: turning raw API article text into display text
//! - **Terminal safety**: stripping control characters and escape sequences
//! - **Terminal fitting**: Unicode-aware width truncation for one-line output
//!
//! # Examples
//!
//! ```
//! use newsreel::util::{fit_width, sanitize, CONTENT_BUDGET};
//!
//! let body = sanitize(Some("Markets &amp; rates <em>today</em> [+1830 chars]"), CONTENT_BUDGET);
//! assert_eq!(body.text, "Markets & rates today");
//! assert!(body.truncated);
//!
//! assert_eq!(fit_width("Long article title", 15), "Long article...");
//! ```

mod text;

pub use text::{
    fit_width, sanitize, strip_control_chars, Sanitized, CONTENT_BUDGET, DESCRIPTION_BUDGET,
};

/// Maximum accepted search keyword length, in characters.
pub const MAX_KEYWORD_LENGTH: usize = 256;
