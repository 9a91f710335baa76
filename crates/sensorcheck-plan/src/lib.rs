//! sensorcheck plans
//!
//! Declarative JSON test plans:
//! - describe an event source and an operation tree ([`PlanSpec`])
//! - identify a plan by the digest of its canonical JSON
//! - build, execute and report the tree ([`PlanRunner`], [`PlanResult`])

pub mod config;
pub mod error;
pub mod runner;

pub use config::{OperationConfig, PlanSpec, SourceConfig, TestConfig, VerificationConfig};
pub use error::{PlanError, Result};
pub use runner::{PlanResult, PlanRunner};
