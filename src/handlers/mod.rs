//! Event handlers.

pub mod summary;

pub use summary::{FrustrationSummaryHandler, ResultPublisher};
