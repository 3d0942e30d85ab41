//! Terminal front end for the reconciliation engine
//!
//! Renders change sets and drives an apply with confirmation and progress.

pub mod differ;
pub mod executor;

pub use executor::{ExecuteOptions, Execution, execute};
