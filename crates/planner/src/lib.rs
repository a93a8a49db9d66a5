//! # Planner
//!
//! Public entry points of the compute boundary. [`Planner::analyze`] and
//! [`Planner::solve`] validate their input, then run the request on the
//! portfolio optimizer unit with one retry against a fresh unit.
//!
//! The optimizer itself runs in an isolated unit ([`service::OptimizerService`]
//! hosted on a [`unitrun::thread_unit::ThreadUnit`] by default) and is reached
//! only through the typed [`api::Optimizer`] facade.

pub mod api;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod planner;
pub mod service;
pub mod types;
pub mod validate;


pub use error::Error;
pub use error::Result;
pub use planner::Planner;
pub use planner::ROLE;
pub use types::AllocationResult;
pub use types::AnalyzeRequest;
pub use types::AnalyzeResult;
pub use types::Asset;
pub use types::SolveRequest;
pub use types::TransactionFees;
