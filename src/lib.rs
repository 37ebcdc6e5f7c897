//! Versioned schema migrations for the leasing database
//!
//! Migrations are registered in a fixed order, applied one transaction at a time and
//! recorded in a ledger table so every run only applies what is still pending.

pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod registry;
pub mod runner;
pub mod schema;

pub use error::{Direction, MigrateError};
pub use registry::{Migration, Registry};
pub use runner::{Runner, RunnerOptions, Status};

pub type Error = Box<dyn std::error::Error + Send + Sync>; // This is constant and should be copy pasted
