//! Parley Shared Types and Utilities
//!
//! Record types, storage errors and database helpers shared by the Parley gateway.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
