//! # Planner
//!
//! Entry points the UI layer calls. Each request is validated up front:
//! anything unusable is answered with `Ok(None)` without touching a unit.
//! Valid requests run on the optimizer unit with one retry against a fresh
//! unit.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use unitrun::UnitConfig;
use unitrun::UnitFactory;
use unitrun::WorkerManager;
use unitrun::ThreadUnitFactory;
use unitrun::run_with_retry;

use crate::api::Optimizer;
use crate::error::Result;
use crate::service::OptimizerService;
use crate::types::AllocationResult;
use crate::types::AnalyzeRequest;
use crate::types::AnalyzeResult;
use crate::types::SolveRequest;
use crate::validate;

/// Role name of the optimizer unit, used in logs.
pub const ROLE: &str = "portfolio-optimizer";

#[derive(Clone)]
pub struct Planner {
    manager: WorkerManager,
}

impl Planner {
    pub fn new(manager: WorkerManager) -> Self {
        Self { manager }
    }

    pub fn with_factory(factory: Arc<dyn UnitFactory>, config: UnitConfig) -> Self {
        Self::new(WorkerManager::new(ROLE, factory, config))
    }

    /// Hosts the optimizer on a dedicated thread per unit.
    pub fn threaded(config: UnitConfig) -> Self {
        Self::with_factory(Arc::new(ThreadUnitFactory::new(OptimizerService::new)), config)
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.manager
    }

    /// Suggested investment for the given holdings.
    pub async fn analyze(&self, assets: &AnalyzeRequest) -> Result<Option<AnalyzeResult>> {
        if let Err(reason) = validate::check_assets(assets) {
            debug!(%reason, "analyze skipped");
            return Ok(None);
        }

        let result = run_with_retry(&self.manager, |proxy| async move {
            proxy.analyze_and_solve(assets).await
        })
        .await?;

        info!(suggested = result.suggested_investment, "analyze complete");
        Ok(Some(result))
    }

    /// Rebalancing plan for the given budget.
    pub async fn solve(&self, request: &SolveRequest) -> Result<Option<AllocationResult>> {
        if let Err(reason) = validate::check_solve(request) {
            debug!(%reason, "solve skipped");
            return Ok(None);
        }

        let result = run_with_retry(&self.manager, |proxy| async move {
            proxy.make_and_solve(request).await
        })
        .await?;

        info!(
            assets = result.targets.len(),
            leftover = result.leftover_budget,
            currency = %request.quote_currency,
            "solve complete"
        );
        Ok(Some(result))
    }

    /// [`Planner::analyze`] on untyped input. Input of the wrong shape yields `Ok(None)`.
    pub async fn analyze_value(&self, input: &Value) -> Result<Option<AnalyzeResult>> {
        match AnalyzeRequest::deserialize(input) {
            Ok(assets) => self.analyze(&assets).await,
            Err(e) => {
                debug!(error = %e, "analyze input rejected");
                Ok(None)
            }
        }
    }

    /// [`Planner::solve`] on untyped input. Input of the wrong shape yields `Ok(None)`.
    pub async fn solve_value(&self, input: &Value) -> Result<Option<AllocationResult>> {
        match SolveRequest::deserialize(input) {
            Ok(request) => self.solve(&request).await,
            Err(e) => {
                debug!(error = %e, "solve input rejected");
                Ok(None)
            }
        }
    }

    /// Tears down the optimizer unit. The next request starts a new one.
    pub async fn shutdown(&self) {
        self.manager.destroy().await;
    }
}
