//! Typed facade over the optimizer's RPC methods.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use unitrun::RpcProxy;

use crate::error::Error;
use crate::error::Result;
use crate::service::method;
use crate::types::AllocationResult;
use crate::types::AnalyzeRequest;
use crate::types::AnalyzeResult;
use crate::types::SolveRequest;

#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn analyze_and_solve(&self, assets: &AnalyzeRequest) -> Result<AnalyzeResult>;
    async fn make_and_solve(&self, request: &SolveRequest) -> Result<AllocationResult>;
}

#[async_trait]
impl Optimizer for RpcProxy {
    async fn analyze_and_solve(&self, assets: &AnalyzeRequest) -> Result<AnalyzeResult> {
        invoke(self, method::ANALYZE_AND_SOLVE, assets).await
    }

    async fn make_and_solve(&self, request: &SolveRequest) -> Result<AllocationResult> {
        invoke(self, method::MAKE_AND_SOLVE, request).await
    }
}

async fn invoke<A, R>(proxy: &RpcProxy, method: &str, args: &A) -> Result<R>
where
    A: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let args = serde_json::to_value(args).map_err(|e| Error::Encode(e.to_string()))?;
    let value = proxy.call(method, args).await?;
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}
