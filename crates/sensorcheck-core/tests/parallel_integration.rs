//! Parallel composition of real capture operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sensorcheck_core::verification::MeanVerification;
use sensorcheck_core::{
    OperationError, OperationState, ParallelSensorOperation, SamplingRate, ScriptedSource,
    SensorDescriptor, SensorOperation, SensorType, SequentialSensorOperation,
    TestSensorEnvironment, TestSensorOperation,
};
use tokio_util::sync::CancellationToken;

fn sensor(name: &str) -> SensorDescriptor {
    SensorDescriptor::new(SensorType::Gyroscope, name, 1_000)
}

fn capture(name: &str, source: ScriptedSource, count: usize) -> TestSensorOperation {
    let env = TestSensorEnvironment::new(Arc::new(source), sensor(name), SamplingRate::Fastest);
    let mut op = TestSensorOperation::by_count(env, count);
    op.add_verification(MeanVerification::new(vec![0.0; 3], vec![0.1; 3]).expect("valid"));
    op
}

fn steady(name: &str, value: f32) -> Box<dyn SensorOperation> {
    let source = ScriptedSource::from_values(1_000_000, vec![vec![value, 0.0, 0.0]; 4]);
    Box::new(capture(name, source, 4))
}

fn stalled(name: &str) -> Box<dyn SensorOperation> {
    Box::new(capture(name, ScriptedSource::stalled(), 1_000))
}

#[tokio::test]
async fn indexed_merge_covers_every_outcome() {
    let mut parallel = ParallelSensorOperation::new().with_timeout(Duration::from_millis(200));
    parallel.add(steady("gyro-ok", 0.0));
    parallel.add(steady("gyro-bad", 0.9));
    parallel.add(stalled("gyro-stuck"));

    let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("Operation 1 failed: \"TestSensorOperation | sensor='gyro-bad'"));
    assert!(message.ends_with(", Operation 2 timed out"), "{message}");
    for key in ["parallel_000", "parallel_001", "parallel_002"] {
        assert!(parallel.stats().contains_key(key), "missing {key}");
    }
    let ok = parallel.stats().sensor_stats("parallel_000").expect("child stats");
    assert_eq!(ok.value("mean_passed").and_then(|v| v.as_bool()), Some(true));
    let stuck = parallel.stats().sensor_stats("parallel_002").expect("child stats");
    assert_eq!(stuck.value("event_count").and_then(|v| v.as_i64()), Some(0));
}

#[tokio::test]
async fn join_is_bounded_by_the_timeout() {
    let timeout = Duration::from_millis(100);
    let mut parallel = ParallelSensorOperation::new().with_timeout(timeout);
    parallel.add(stalled("gyro-a"));
    parallel.add(stalled("gyro-b"));
    parallel.add(stalled("gyro-c"));

    let started = Instant::now();
    let err = parallel.execute(&CancellationToken::new()).await.unwrap_err();

    // cancelled captures unwind promptly, well inside the drain grace
    assert!(started.elapsed() < timeout + Duration::from_millis(900));
    assert_eq!(err.to_string(), "Operations 0, 1, 2 timed out");
    assert!(err.is_assertion());
}

#[tokio::test]
async fn nested_composers_merge_recursively() {
    let mut inner = SequentialSensorOperation::new();
    inner.add(steady("gyro-1", 0.0));
    inner.add(steady("gyro-2", 0.05));

    let mut parallel = ParallelSensorOperation::new();
    parallel.add(Box::new(inner));
    parallel.add(steady("gyro-3", 0.0));

    parallel.execute(&CancellationToken::new()).await.expect("all pass");

    let flat = parallel.stats().flatten();
    assert!(flat.contains_key("parallel_000__sequential_001__mean_passed"));
    assert!(flat.contains_key("parallel_001__sensor_name"));
    assert!(parallel
        .operations()
        .iter()
        .all(|op| op.state() == OperationState::Completed));
}

#[tokio::test]
async fn clone_of_executed_tree_runs_again() {
    let mut parallel = ParallelSensorOperation::new();
    parallel.add(steady("gyro-1", 0.0));
    parallel.add(steady("gyro-2", 0.9));

    let first = parallel.execute(&CancellationToken::new()).await.unwrap_err();
    let mut again = parallel.clone_operation();
    let second = again.execute(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(first.to_string(), second.to_string());
    assert!(matches!(
        parallel.execute(&CancellationToken::new()).await,
        Err(OperationError::AlreadyExecuted)
    ));
}
