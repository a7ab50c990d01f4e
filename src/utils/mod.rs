//! Utility functions shared across the codebase

pub mod math;
pub mod timeout;

// Re-export commonly used utilities
pub use math::cosine_similarity;
pub use timeout::{Expired, bounded};
