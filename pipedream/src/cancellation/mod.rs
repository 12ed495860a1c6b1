//! Cooperative cancellation.
//!
//! This module provides:
//! - CancellationToken, checked by workers before every blocking step

mod token;

pub use token::CancellationToken;
