//! Shared types for Pairway

mod error;

pub use error::{PairwayError, Result};
