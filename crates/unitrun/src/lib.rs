//! # Unitrun
//!
//! Host side of the compute boundary: isolated compute units reached only by
//! messages, a correlating RPC proxy over each unit, a bounded-time health
//! handshake, and a per-role manager that creates, verifies, reuses and
//! replaces units.
//!
//! ```ignore
//! let factory = Arc::new(ThreadUnitFactory::new(MyService::default));
//! let manager = WorkerManager::new("portfolio-optimizer", factory, UnitConfig::default());
//! let value = run_with_retry(&manager, |proxy| async move {
//!     proxy.call("work", json!({})).await.map_err(MyError::from)
//! }).await?;
//! ```

pub mod config;
pub mod handshake;
pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_unit;
pub mod proxy;
pub mod runner;
pub mod thread_unit;
pub mod unit;


pub use config::UnitConfig;
pub use manager::WorkerManager;
pub use proxy::RpcProxy;
pub use runner::run_with_retry;
pub use thread_unit::ThreadUnitFactory;
pub use thread_unit::UnitService;
pub use unit::ComputeUnit;
pub use unit::UnitFactory;
