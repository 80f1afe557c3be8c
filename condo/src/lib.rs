//! Library surface for the `condo` binary: the reconciler engine and the
//! diagnostic query endpoint, exposed so the scenario-test crate can
//! drive them directly instead of through a spawned process.

pub mod app_context;
pub mod config;
pub mod query;
pub mod reconciler;
