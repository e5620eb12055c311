//! Engine tests for `LocalEngine`.
//!
//! These use `MockOperation` and local transforms only, so no gateway is
//! required. HTTP dispatch is covered by the `operations` crate's
//! integration tests.

use std::sync::{Arc, Mutex};

use operations::mock::MockOperation;
use operations::{ExecutionOptions, OperationError, Options};

use crate::{
    BranchOptions, Dag, EdgePolicy, EngineError, ExecutorConfig, LocalEngine, PipelineEngine,
    PipelineState, VertexState, Workflow,
};

fn options() -> ExecutionOptions {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ExecutionOptions::new("req-test", "gateway:8080")
}

/// Build a workflow whose vertices are connected linearly:
/// ids[0] → ids[1] → … → ids[n-1], each appending its own name.
fn linear_workflow(ids: &[&str]) -> (Workflow, Vec<Arc<MockOperation>>) {
    let mut workflow = Workflow::new();
    let mut mocks = Vec::new();
    for id in ids {
        let mock = Arc::new(MockOperation::appending(*id, *id));
        workflow.dag_mut().node(*id).add_operation(mock.clone());
        mocks.push(mock);
    }
    for pair in ids.windows(2) {
        workflow.dag_mut().edge(pair[0], pair[1]).unwrap();
    }
    (workflow, mocks)
}

fn append(payload: &[u8], suffix: &[u8]) -> Vec<u8> {
    [payload, suffix].concat()
}

async fn run(workflow: Workflow, input: &[u8]) -> Result<crate::ExecutionResult, EngineError> {
    let pipeline = workflow.into_pipeline().expect("valid workflow");
    LocalEngine::default().execute(&pipeline, input.to_vec(), &options()).await
}

// ============================================================
// Chains and edges
// ============================================================

#[tokio::test]
async fn three_vertex_pipeline_output_propagation() {
    let (workflow, mocks) = linear_workflow(&["a", "b", "c"]);

    let result = run(workflow, b">").await.unwrap();

    assert_eq!(result.output, b">abc");
    assert_eq!(result.request_id, "req-test");
    for mock in &mocks {
        assert_eq!(mock.call_count(), 1);
    }
    assert_eq!(mocks[1].inputs(), vec![b">a".to_vec()]);
    assert!(result.vertices.values().all(|s| *s == VertexState::Done));
}

#[tokio::test]
async fn chain_runs_in_registration_order() {
    let mut workflow = Workflow::new();
    workflow
        .sync_node()
        .modify(|d| Ok(append(d, b"1")))
        .transform("second", |d, params| {
            let suffix = params.get("suffix").and_then(|v| v.first()).cloned().unwrap_or_default();
            Ok(append(d, suffix.as_bytes()))
        }, Options::new().option("suffix", ["2"]))
        .add_operation(Arc::new(MockOperation::appending("third", "3")));

    let result = run(workflow, b"").await.unwrap();
    assert_eq!(result.output, b"123");
}

#[tokio::test]
async fn join_without_aggregator_concatenates_in_parent_order() {
    //   a
    //  / \
    // b   c
    //  \ /
    //   d
    let mut workflow = Workflow::new();
    let dag = workflow.dag_mut();
    dag.node("a");
    dag.node("b").modify(|d| Ok(append(d, b"-b")));
    dag.node("c").modify(|d| Ok(append(d, b"-c")));
    dag.node("d");
    dag.edge("a", "b").unwrap();
    dag.edge("a", "c").unwrap();
    dag.edge("b", "d").unwrap();
    dag.edge("c", "d").unwrap();

    let result = run(workflow, b"x").await.unwrap();
    assert_eq!(result.output, b"x-bx-c");
}

#[tokio::test]
async fn aggregator_sees_inputs_keyed_by_parent() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_aggregator = seen.clone();

    let mut workflow = Workflow::new();
    let dag = workflow.dag_mut();
    dag.node("a");
    dag.node("b");
    dag.node("c");
    dag.node("join").add_aggregator(move |inputs| {
        seen_in_aggregator
            .lock()
            .unwrap()
            .extend(inputs.keys().cloned());
        Ok(b"merged".to_vec())
    });
    dag.edge("a", "b").unwrap();
    dag.edge("a", "c").unwrap();
    dag.edge("b", "join").unwrap();
    dag.edge("c", "join").unwrap();

    let result = run(workflow, b"x").await.unwrap();
    assert_eq!(result.output, b"merged");
    assert_eq!(*seen.lock().unwrap(), vec!["b", "c"]);
}

#[tokio::test]
async fn forwarders_and_no_data_edges() {
    let mut workflow = Workflow::new();
    let dag = workflow.dag_mut();
    dag.node("a");
    dag.node("shout");
    dag.node("quiet");
    let join = Arc::new(MockOperation::appending("join", "!"));
    dag.node("join").add_operation(join.clone());
    dag.edge_with("a", "shout", EdgePolicy::forwarder(|d| d.to_ascii_uppercase())).unwrap();
    dag.edge_with("a", "quiet", EdgePolicy::NoData).unwrap();
    dag.edge("shout", "join").unwrap();
    dag.edge("quiet", "join").unwrap();

    let result = run(workflow, b"hey").await.unwrap();

    // "quiet" ran on an empty payload and forwarded that.
    assert_eq!(result.output, b"HEY!");
    assert_eq!(join.inputs(), vec![b"HEY".to_vec()]);
    assert_eq!(result.vertices["quiet"], VertexState::Done);
}

// ============================================================
// Composite vertices
// ============================================================

#[tokio::test]
async fn sub_dag_output_feeds_the_vertex_chain() {
    let mut inner = Dag::new();
    inner.node("one").modify(|d| Ok(append(d, b"1")));
    inner.node("two").modify(|d| Ok(append(d, b"2")));
    inner.edge("one", "two").unwrap();

    let mut workflow = Workflow::new();
    let dag = workflow.dag_mut();
    dag.node("start");
    dag.sub_dag("inner", inner).unwrap().modify(|d| Ok(append(d, b"!")));
    dag.edge("start", "inner").unwrap();

    let result = run(workflow, b">").await.unwrap();
    assert_eq!(result.output, b">12!");
}

#[tokio::test]
async fn for_each_runs_the_template_once_per_item() {
    let item = Arc::new(MockOperation::appending("item", "*"));

    let mut workflow = Workflow::new();
    let template = workflow
        .dag_mut()
        .for_each_branch(
            "fan",
            |d| Ok(d.split(|b| *b == b',').map(<[u8]>::to_vec).collect()),
            BranchOptions::new(),
        )
        .unwrap();
    template.node("item").add_operation(item.clone());

    let result = run(workflow, b"a,b,c").await.unwrap();

    assert_eq!(item.call_count(), 3);
    assert_eq!(item.inputs(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    // Default merge concatenates in item order.
    assert_eq!(result.output, b"a*b*c*");
}

#[tokio::test]
async fn for_each_merge_is_deterministic_with_concurrency() {
    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .for_each_branch(
            "fan",
            |d| Ok(d.iter().map(|b| vec![*b]).collect()),
            BranchOptions::new().aggregator(|outputs| {
                let keys: Vec<&str> = outputs.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["0", "1", "2", "3"]);
                Ok(outputs.values().rev().flatten().copied().collect())
            }),
        )
        .unwrap()
        .node("item")
        .modify(|d| Ok(d.to_ascii_uppercase()));

    let pipeline = workflow.into_pipeline().unwrap();
    let engine = LocalEngine::new(ExecutorConfig { for_each_concurrency: 4 });
    let result = engine.execute(&pipeline, b"abcd".to_vec(), &options()).await.unwrap();

    assert_eq!(result.output, b"DCBA");
}

#[tokio::test]
async fn for_each_without_forwarding_starts_from_empty_payloads() {
    let item = Arc::new(MockOperation::appending("item", "."));

    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .for_each_branch("fan", |_| Ok(vec![b"x".to_vec(); 2]), BranchOptions::new().no_forward())
        .unwrap()
        .node("item")
        .add_operation(item.clone());

    let result = run(workflow, b"ignored").await.unwrap();
    assert_eq!(item.inputs(), vec![Vec::<u8>::new(), Vec::new()]);
    assert_eq!(result.output, b"..");
}

#[tokio::test]
async fn split_failure_is_reported_with_the_vertex() {
    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .for_each_branch("fan", |_| Err(anyhow::anyhow!("not a list")), BranchOptions::new())
        .unwrap()
        .node("item");

    let err = run(workflow, b"").await.unwrap_err();
    assert!(matches!(err, EngineError::Split { ref vertex, .. } if vertex == "fan"));
}

#[tokio::test]
async fn conditional_runs_only_selected_branches() {
    let left = Arc::new(MockOperation::appending("left", "<"));
    let right = Arc::new(MockOperation::appending("right", ">"));
    let middle = Arc::new(MockOperation::appending("middle", "|"));

    let mut workflow = Workflow::new();
    let mut branches = workflow
        .dag_mut()
        .conditional_branch(
            "route",
            ["left", "middle", "right"],
            |d| {
                if d.starts_with(b"l") {
                    vec!["left".to_owned(), "unknown".to_owned()]
                } else {
                    vec!["right".to_owned(), "middle".to_owned()]
                }
            },
            BranchOptions::new(),
        )
        .unwrap();
    branches.get_mut("left").unwrap().node("l").add_operation(left.clone());
    branches.get_mut("middle").unwrap().node("m").add_operation(middle.clone());
    branches.get_mut("right").unwrap().node("r").add_operation(right.clone());

    let pipeline = workflow.into_pipeline().unwrap();
    let engine = LocalEngine::default();

    let result = engine.execute(&pipeline, b"l".to_vec(), &options()).await.unwrap();
    assert_eq!(result.output, b"l<");
    assert_eq!(left.call_count(), 1);
    assert_eq!(middle.call_count(), 0);
    assert_eq!(right.call_count(), 0);

    // Outputs merge in the order the classifier selected them.
    let result = engine.execute(&pipeline, b"r".to_vec(), &options()).await.unwrap();
    assert_eq!(result.output, b"r>r|");
    assert_eq!(left.call_count(), 1);
    assert_eq!(right.call_count(), 1);
}

#[tokio::test]
async fn conditional_with_no_selection_yields_an_empty_payload() {
    let branch = Arc::new(MockOperation::appending("branch", "?"));

    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .conditional_branch("route", ["only"], |_| Vec::new(), BranchOptions::new())
        .unwrap()
        .get_mut("only")
        .unwrap()
        .node("b")
        .add_operation(branch.clone());

    let result = run(workflow, b"input").await.unwrap();
    assert!(result.output.is_empty());
    assert_eq!(branch.call_count(), 0);
}

// ============================================================
// Failures
// ============================================================

#[tokio::test]
async fn failing_operation_stops_the_pipeline() {
    let mut workflow = Workflow::new();
    let ok = Arc::new(MockOperation::returning("ok", "fine"));
    let boom = Arc::new(MockOperation::failing("boom", "something broke"));
    let never = Arc::new(MockOperation::returning("never", "unreachable"));
    let dag = workflow.dag_mut();
    dag.node("ok").add_operation(ok.clone());
    dag.node("boom").add_operation(boom.clone());
    dag.node("never").add_operation(never.clone());
    dag.edge("ok", "boom").unwrap();
    dag.edge("boom", "never").unwrap();

    let err = run(workflow, b"").await.unwrap_err();

    match &err {
        EngineError::Operation { vertex, operation, source } => {
            assert_eq!(vertex, "boom");
            assert_eq!(operation, "boom");
            assert!(matches!(source, OperationError::Custom(msg) if msg == "something broke"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.operation_error().is_some());
    assert_eq!(never.call_count(), 0);
}

#[tokio::test]
async fn operation_failure_handler_recovers_locally() {
    let mut workflow = Workflow::new();
    workflow
        .sync_node()
        .transform(
            "strict",
            |_, _| Err(anyhow::anyhow!("bad input")),
            Options::new().on_failure(|err| {
                assert!(err.to_string().starts_with("function(strict) execution failed"));
                Ok(())
            }),
        )
        .modify(|d| Ok(append(d, b"after")));

    let result = run(workflow, b"before").await.unwrap();
    assert_eq!(result.output, b"after");
}

#[tokio::test]
async fn failure_handler_and_finally_run_once() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let handled = Arc::new(Mutex::new(0));

    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .node("boom")
        .add_operation(Arc::new(MockOperation::failing("boom", "down")));
    let handled_in = handled.clone();
    let states_in = states.clone();
    workflow
        .on_failure(move |err| {
            *handled_in.lock().unwrap() += 1;
            Err(err)
        })
        .finally(move |state| states_in.lock().unwrap().push(state));

    let err = run(workflow, b"").await.unwrap_err();

    assert!(matches!(err, EngineError::Operation { .. }));
    assert_eq!(*handled.lock().unwrap(), 1);
    assert_eq!(*states.lock().unwrap(), vec![PipelineState::Failure]);
}

#[tokio::test]
async fn pipeline_failure_handler_can_recover() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_in = states.clone();

    let mut workflow = Workflow::new();
    workflow
        .sync_node()
        .add_operation(Arc::new(MockOperation::failing("boom", "down")));
    workflow
        .on_failure(|_| Ok(b"fallback".to_vec()))
        .finally(move |state| states_in.lock().unwrap().push(state));

    let result = run(workflow, b"").await.unwrap();

    assert_eq!(result.output, b"fallback");
    assert_eq!(*states.lock().unwrap(), vec![PipelineState::Success]);
}

#[tokio::test]
async fn finally_runs_once_on_success() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_in = states.clone();

    let (mut workflow, _) = linear_workflow(&["a", "b"]);
    workflow.finally(move |state| states_in.lock().unwrap().push(state));

    run(workflow, b"").await.unwrap();
    assert_eq!(*states.lock().unwrap(), vec![PipelineState::Success]);
}

#[tokio::test]
async fn branch_failures_name_the_branch() {
    let mut workflow = Workflow::new();
    workflow
        .dag_mut()
        .for_each_branch("fan", |_| Ok(vec![Vec::new(); 2]), BranchOptions::new())
        .unwrap()
        .node("item")
        .add_operation(Arc::new(MockOperation::failing("item", "nope")));

    let err = run(workflow, b"").await.unwrap_err();
    match err {
        EngineError::Branch { vertex, branch, source } => {
            assert_eq!(vertex, "fan");
            assert_eq!(branch, "0");
            assert!(matches!(*source, EngineError::Operation { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn aggregation_failure_is_reported_with_the_vertex() {
    let mut workflow = Workflow::new();
    workflow
        .sync_node()
        .add_aggregator(|_| Err(anyhow::anyhow!("cannot merge")));

    let err = run(workflow, b"").await.unwrap_err();
    assert!(matches!(err, EngineError::Aggregation { ref vertex, .. } if vertex == "sync"));
}
