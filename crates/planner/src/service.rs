//! The optimizer as seen from inside its unit.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use unitrpc::FailureReason;
use unitrun::UnitService;

use crate::optimizer;
use crate::types::AnalyzeRequest;
use crate::types::SolveRequest;
use crate::validate;

/// Business methods exposed by the optimizer unit.
pub mod method {
    pub const ANALYZE_AND_SOLVE: &str = "analyze_and_solve";
    pub const MAKE_AND_SOLVE: &str = "make_and_solve";
}

/// Serves [`method`] calls with the reference optimizer.
#[derive(Debug, Default)]
pub struct OptimizerService {
    solves: u64,
}

impl OptimizerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn analyze(&mut self, args: Value) -> Result<Value, FailureReason> {
        let assets: AnalyzeRequest = decode(args)?;
        validate::check_assets(&assets).map_err(|e| FailureReason::BadArguments(e.to_string()))?;
        encode(&optimizer::suggest_investment(&assets))
    }

    fn solve(&mut self, args: Value) -> Result<Value, FailureReason> {
        let request: SolveRequest = decode(args)?;
        validate::check_solve(&request).map_err(|e| FailureReason::BadArguments(e.to_string()))?;
        self.solves += 1;
        debug!(solves = self.solves, assets = request.assets.len(), "solving allocation");
        encode(&optimizer::allocate(&request))
    }
}

impl UnitService for OptimizerService {
    fn init(&mut self) -> Result<(), String> {
        debug!("optimizer ready");
        Ok(())
    }

    fn call(&mut self, method: &str, args: Value) -> Result<Value, FailureReason> {
        match method {
            method::ANALYZE_AND_SOLVE => self.analyze(args),
            method::MAKE_AND_SOLVE => self.solve(args),
            other => Err(FailureReason::MethodNotFound(other.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, FailureReason> {
    serde_json::from_value(args).map_err(|e| FailureReason::BadArguments(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, FailureReason> {
    serde_json::to_value(value).map_err(|e| FailureReason::Failed(e.to_string()))
}
