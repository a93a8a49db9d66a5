//! End-to-end tests for the planner entry points.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tokio::time::Instant;

use planner::Asset;
use planner::Error;
use planner::Planner;
use planner::SolveRequest;
use unitrpc::FailureReason;
use unitrun::UnitConfig;
use unitrun::mock_unit::MockFactory;
use unitrun::mock_unit::MockReply;
use unitrun::mock_unit::MockScript;
use unitrun::proxy;

fn planner_on(factory: &Arc<MockFactory>) -> Planner {
    Planner::with_factory(factory.clone(), UnitConfig::default().ping_timeout(Duration::from_millis(200)))
}

fn assets() -> BTreeMap<String, Asset> {
    [Asset::new("A", 50.0, 10.0).holding(10.0), Asset::new("B", 50.0, 10.0)]
        .into_iter()
        .map(|a| (a.symbol.clone(), a))
        .collect()
}

fn solve_request(budget: f64) -> SolveRequest {
    SolveRequest {
        budget,
        assets: assets(),
        quote_currency: "EUR".into(),
        fees: None,
        buy_only: true,
        use_all_budget: false,
    }
}

fn allocation(leftover: f64) -> Value {
    json!({"targets": {}, "shares": {}, "theoreticalAllocations": {}, "leftoverBudget": leftover})
}

#[tokio::test]
async fn test_invalid_input_creates_no_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let planner = planner_on(&factory);

    assert_eq!(planner.analyze(&BTreeMap::new()).await.unwrap(), None);
    assert_eq!(planner.analyze_value(&json!([1, 2, 3])).await.unwrap(), None);
    assert_eq!(planner.solve(&solve_request(-5.0)).await.unwrap(), None);
    assert_eq!(planner.solve_value(&json!({"budget": 10, "assets": []})).await.unwrap(), None);
    assert_eq!(planner.solve_value(&Value::Null).await.unwrap(), None);

    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_mistyped_ui_input_creates_no_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let planner = planner_on(&factory);
    let asset = json!({"symbol": "A", "targetWeight": 100.0, "price": 10.0});

    let budget_as_text = json!({"budget": "100", "quoteCurrency": "EUR", "assets": {"A": asset}});
    assert_eq!(planner.solve_value(&budget_as_text).await.unwrap(), None);
    assert_eq!(factory.created(), 0);

    let null_assets = json!({"budget": 10, "quoteCurrency": "EUR", "assets": null});
    assert_eq!(planner.solve_value(&null_assets).await.unwrap(), None);
    assert_eq!(factory.created(), 0);

    assert_eq!(planner.analyze_value(&Value::Null).await.unwrap(), None);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_analyze_retries_on_a_fresh_unit() {
    let factory = Arc::new(MockFactory::new(|i| {
        MockScript::healthy(move |_, _, _| {
            if i == 0 {
                MockReply::Fail(FailureReason::Trapped("unreachable".into()))
            } else {
                MockReply::Value(json!({"suggestedInvestment": 42.0}))
            }
        })
    }));
    let planner = planner_on(&factory);

    let result = planner.analyze(&assets()).await.unwrap().unwrap();

    assert_eq!(result.suggested_investment, 42.0);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.unit(0).unwrap().terminate_calls(), 1);
    assert_eq!(factory.unit(0).unwrap().calls().last().map(String::as_str), Some("analyze_and_solve"));
}

#[tokio::test]
async fn test_solve_failing_twice_is_an_error() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, _| {
        MockReply::Fail(FailureReason::Failed("infeasible".into()))
    })));
    let planner = planner_on(&factory);

    let err = planner.solve(&solve_request(100.0)).await.unwrap_err();

    assert!(matches!(err, Error::Call(proxy::Error::Remote(_))), "{}", err);
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_malformed_result_counts_as_failure() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, _| MockReply::Value(json!("garbage")))));
    let planner = planner_on(&factory);

    let err = planner.analyze(&assets()).await.unwrap_err();

    assert!(matches!(err, Error::Decode(_)), "{}", err);
    assert_eq!(factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_solves_share_one_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, args| {
        let budget = args["budget"].as_f64().unwrap_or(0.0);
        MockReply::After(Duration::from_millis(250), Box::new(MockReply::Value(allocation(budget))))
    })));
    let planner = planner_on(&factory);
    let start = Instant::now();

    let (req_a, req_b) = (solve_request(10.0), solve_request(20.0));
    let (a, b) = tokio::join!(planner.solve(&req_a), planner.solve(&req_b));

    assert_eq!(a.unwrap().unwrap().leftover_budget, 10.0);
    assert_eq!(b.unwrap().unwrap().leftover_budget, 20.0);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_shutdown_forces_a_new_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, _| {
        MockReply::Value(json!({"suggestedInvestment": 1.0}))
    })));
    let planner = planner_on(&factory);

    planner.analyze(&assets()).await.unwrap();
    planner.shutdown().await;
    planner.analyze(&assets()).await.unwrap();

    assert_eq!(factory.created(), 2);
    assert!(factory.unit(0).unwrap().is_terminated());
}

#[tokio::test]
async fn test_threaded_optimizer_end_to_end() {
    let planner = Planner::threaded(UnitConfig::default());

    let analysis = planner.analyze(&assets()).await.unwrap().unwrap();
    assert!((analysis.suggested_investment - 100.0).abs() < 1e-6);

    let plan = planner
        .solve_value(&json!({
            "budget": 100.0,
            "quoteCurrency": "EUR",
            "buyOnly": true,
            "assets": {
                "A": {"symbol": "A", "targetWeight": 50.0, "price": 10.0, "shares": 10.0, "currentAmount": 100.0},
                "B": {"symbol": "B", "targetWeight": 50.0, "price": 10.0}
            }
        }))
        .await
        .unwrap()
        .unwrap();
    assert!((plan.shares["B"] - 10.0).abs() < 1e-6);
    assert!(plan.leftover_budget.abs() < 1e-6);
    assert_eq!(planner.manager().units_created(), 1);

    planner.shutdown().await;
    assert!(!planner.manager().is_ready().await);
}
