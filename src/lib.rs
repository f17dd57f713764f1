//! frustration-stats - Teamworking survey statistics generator
//!
//! Consumes submitted "The 5 Frustrations on Teamworking" survey forms
//! from a message bus and republishes averaged composite forms at
//! organization and team granularity.

pub mod aggregate;
pub mod bus;
pub mod clients;
pub mod config;
pub mod forms;
pub mod handlers;
pub mod test_utils;
pub mod utils;
