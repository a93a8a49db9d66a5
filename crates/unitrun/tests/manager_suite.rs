//! Lifecycle tests for the worker manager and the retry runner.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use serde_json::json;
use tokio::time::Instant;

use unitrpc::FailureReason;
use unitrun::UnitConfig;
use unitrun::WorkerManager;
use unitrun::manager;
use unitrun::mock_unit::MockFactory;
use unitrun::mock_unit::MockReply;
use unitrun::mock_unit::MockScript;
use unitrun::mock_unit::PingBehavior;
use unitrun::proxy;
use unitrun::run_with_retry;
use unitrun::unit;
use unitrun::unit::ComputeUnit;
use unitrun::unit::UnitFactory;

const PING_TIMEOUT: Duration = Duration::from_millis(200);

fn manager_with(factory: &Arc<MockFactory>) -> WorkerManager {
    let config = UnitConfig::default().ping_timeout(PING_TIMEOUT).init_timeout(Duration::from_secs(1));
    WorkerManager::new("test-role", factory.clone(), config)
}

/// Error type a caller of the runner would define.
#[derive(Debug)]
enum CallError {
    Worker(manager::Error),
    Call(proxy::Error),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker(e) => write!(f, "{}", e),
            Self::Call(e) => write!(f, "{}", e),
        }
    }
}

impl From<manager::Error> for CallError {
    fn from(e: manager::Error) -> Self {
        Self::Worker(e)
    }
}

async fn work(manager: &WorkerManager, args: Value) -> Result<Value, CallError> {
    run_with_retry(manager, |proxy| {
        let args = args.clone();
        async move { proxy.call("work", args).await.map_err(CallError::Call) }
    })
    .await
}

// --- get_or_create ---

#[tokio::test]
async fn test_concurrent_get_or_create_creates_one_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let manager = manager_with(&factory);

    let results = futures::future::join_all((0..8).map(|_| manager.get_or_create())).await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
    assert_eq!(factory.created(), 1);
    let unit = factory.unit(0).unwrap();
    assert_eq!(unit.calls().iter().filter(|m| *m == "ping").count(), 1);
}

#[tokio::test]
async fn test_steady_state_reuses_the_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let manager = manager_with(&factory);

    for i in 0..10 {
        assert_eq!(work(&manager, json!(i)).await.unwrap(), json!(i));
    }

    assert_eq!(factory.created(), 1);
    assert_eq!(manager.units_created(), 1);
    let calls = factory.unit(0).unwrap().calls();
    assert_eq!(calls.iter().filter(|m| *m == "ping").count(), 1);
    assert_eq!(calls.iter().filter(|m| *m == "init").count(), 1);
}

#[tokio::test]
async fn test_failed_creation_leaves_nothing_behind() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo().ping(PingBehavior::ErrorEvent)));
    let manager = manager_with(&factory);

    let err = manager.get_or_create().await.unwrap_err();

    assert!(matches!(err, manager::Error::Handshake(_)));
    assert!(!manager.is_ready().await);
    let unit = factory.unit(0).unwrap();
    assert_eq!(unit.terminate_calls(), 1);
    assert_eq!(unit.live_listeners(), 0);
    assert_eq!(unit.listener_adds(), unit.listener_removes());
}

#[tokio::test]
async fn test_factory_failure_is_reported() {
    let factory = Arc::new(MockFactory::failing());
    let manager = manager_with(&factory);

    let err = manager.get_or_create().await.unwrap_err();

    assert!(matches!(err, manager::Error::Create(_)));
    assert_eq!(manager.units_created(), 0);
}

/// Panics on its first unit, then builds healthy ones.
struct PanicsOnce {
    calls: AtomicUsize,
    units: MockFactory,
}

impl UnitFactory for PanicsOnce {
    fn create_unit(&self) -> unit::Result<Arc<dyn ComputeUnit>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("factory blew up");
        }
        self.units.create_unit()
    }
}

#[tokio::test]
async fn test_panicked_creation_does_not_wedge_the_role() {
    let factory = Arc::new(PanicsOnce { calls: AtomicUsize::new(0), units: MockFactory::uniform(MockScript::echo()) });
    let manager = WorkerManager::new("test-role", factory.clone(), UnitConfig::default());

    let err = manager.get_or_create().await.unwrap_err();
    assert!(matches!(err, manager::Error::Aborted(_)), "{}", err);
    assert!(!manager.is_ready().await);

    manager.get_or_create().await.unwrap();
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    assert!(manager.is_ready().await);
}

#[tokio::test]
async fn test_runner_recovers_from_panicked_creation() {
    let factory = Arc::new(PanicsOnce { calls: AtomicUsize::new(0), units: MockFactory::uniform(MockScript::echo()) });
    let manager = WorkerManager::new("test-role", factory.clone(), UnitConfig::default());

    assert_eq!(work(&manager, json!("after")).await.unwrap(), json!("after"));
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    assert_eq!(factory.units.created(), 1);
}

// --- destroy ---

#[tokio::test]
async fn test_destroy_is_safe_when_empty() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let manager = manager_with(&factory);

    manager.destroy().await;
    manager.destroy().await;

    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_destroy_then_get_creates_a_fresh_unit() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let manager = manager_with(&factory);

    let first = manager.get_or_create().await.unwrap();
    manager.destroy().await;
    let second = manager.get_or_create().await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.created(), 2);
    let old = factory.unit(0).unwrap();
    assert_eq!(old.terminate_calls(), 1);
    assert_eq!(old.live_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_during_creation_supersedes_it() {
    let factory = Arc::new(MockFactory::new(|i| {
        if i == 0 { MockScript::echo().ping(PingBehavior::Silent) } else { MockScript::echo() }
    }));
    let manager = manager_with(&factory);

    let waiting = tokio::spawn({
        let manager = manager.clone();
        async move { manager.get_or_create().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.destroy().await;

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, manager::Error::Handshake(_) | manager::Error::Superseded));
    assert!(factory.unit(0).unwrap().is_terminated());

    manager.get_or_create().await.unwrap();
    assert_eq!(factory.created(), 2);
}

// --- retry policy ---

#[tokio::test]
async fn test_ping_error_retries_once_then_fails() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo().ping(PingBehavior::ErrorEvent)));
    let manager = manager_with(&factory);

    let err = work(&manager, Value::Null).await.unwrap_err();

    assert!(err.to_string().contains("ping failed"), "{}", err);
    assert_eq!(factory.created(), 2);
    for unit in factory.units() {
        assert_eq!(unit.terminate_calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_ping_timeout_retries_once_then_fails() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo().ping(PingBehavior::Silent)));
    let manager = manager_with(&factory);
    let start = Instant::now();

    let err = work(&manager, Value::Null).await.unwrap_err();

    assert!(err.to_string().contains("timed out"), "{}", err);
    assert!(start.elapsed() >= PING_TIMEOUT * 2);
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_business_failure_recovers_on_fresh_unit() {
    let factory = Arc::new(MockFactory::new(|i| {
        MockScript::healthy(move |_, _, _| {
            if i == 0 {
                MockReply::Fail(FailureReason::Trapped("unreachable".into()))
            } else {
                MockReply::Value(json!("second"))
            }
        })
    }));
    let manager = manager_with(&factory);

    let value = work(&manager, Value::Null).await.unwrap();

    assert_eq!(value, json!("second"));
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.unit(0).unwrap().terminate_calls(), 1);
    assert_eq!(factory.unit(1).unwrap().terminate_calls(), 0);
}

#[tokio::test]
async fn test_error_event_during_call_recovers() {
    let factory = Arc::new(MockFactory::new(|i| {
        MockScript::healthy(move |_, _, _| {
            if i == 0 { MockReply::ErrorEvent("out of memory".into()) } else { MockReply::Value(json!(7)) }
        })
    }));
    let manager = manager_with(&factory);

    assert_eq!(work(&manager, Value::Null).await.unwrap(), json!(7));
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_second_business_failure_propagates() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, _| {
        MockReply::Fail(FailureReason::Failed("infeasible".into()))
    })));
    let manager = manager_with(&factory);

    let err = work(&manager, Value::Null).await.unwrap_err();

    assert!(matches!(err, CallError::Call(proxy::Error::Remote(_))));
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_discard_leaves_a_replacement_alone() {
    let factory = Arc::new(MockFactory::uniform(MockScript::echo()));
    let manager = manager_with(&factory);

    let stale = manager.get_or_create().await.unwrap();
    manager.destroy().await;
    let fresh = manager.get_or_create().await.unwrap();
    manager.discard(&stale).await;

    assert!(manager.is_ready().await);
    assert!(Arc::ptr_eq(&fresh, &manager.get_or_create().await.unwrap()));
    assert_eq!(factory.unit(1).unwrap().terminate_calls(), 0);
}

// --- concurrency ---

#[tokio::test(start_paused = true)]
async fn test_independent_calls_are_not_serialized() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, args| {
        let delay = args["delay"].as_u64().unwrap_or(0);
        MockReply::After(Duration::from_millis(delay), Box::new(MockReply::Value(args["id"].clone())))
    })));
    let manager = manager_with(&factory);
    manager.get_or_create().await.unwrap();
    let start = Instant::now();

    let (a, b) = tokio::join!(
        work(&manager, json!({"id": "a", "delay": 300})),
        work(&manager, json!({"id": "b", "delay": 300})),
    );

    assert_eq!(a.unwrap(), json!("a"));
    assert_eq!(b.unwrap(), json!("b"));
    assert!(start.elapsed() < Duration::from_millis(600));
    assert_eq!(factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_many_calls_complete_out_of_order() {
    let factory = Arc::new(MockFactory::uniform(MockScript::healthy(|_, _, args| {
        let delay = args["delay"].as_u64().unwrap_or(0);
        MockReply::After(Duration::from_millis(delay), Box::new(MockReply::Value(args["id"].clone())))
    })));
    let manager = manager_with(&factory);

    let mut rng = rand::thread_rng();
    let requests: Vec<Value> = (0..32)
        .map(|id| json!({"id": id, "delay": rng.gen_range(1..500)}))
        .collect();

    let results = futures::future::join_all(requests.iter().map(|r| work(&manager, r.clone()))).await;

    for (request, result) in requests.iter().zip(results) {
        assert_eq!(result.unwrap(), request["id"]);
    }
    assert_eq!(factory.created(), 1);
}
