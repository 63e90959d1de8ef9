//! Library root for the `ci_compliance` crate
//! Carbon intensity scoring, verification workflow and audit trail for biofuel feedstock reports

// Core error handling
pub mod errors;

// Domain model
pub mod emissions;
pub mod report;
pub mod roles;
pub mod feedstock;

// Calculation
pub mod ci_engine;
pub mod input_validator;

// Workflow & authorization
pub mod access_policy;
pub mod lifecycle;
pub mod orchestrator;

// Audit & persistence
pub mod audit;
pub mod report_store;
pub mod report_store_sled;

// Configuration & CLI
pub mod cli;
pub mod config_loader;

// Web server interface
pub mod ciweb;

// Logging
pub mod log_sink;


pub use errors::{CiError, CiResult, ErrorKind};
pub use orchestrator::ReportOrchestrator;
pub use roles::{Actor, Role};
