mod support;

use std::sync::Arc;
use std::time::Duration;

use support::gateway::ScriptedGateway;

use labelloop::runtime::{RuntimeEvent, SessionRuntime};
use labelloop::session::{
    DataPoint, FilterPredicate, GatewayError, LearnerKind, PointId, SamplingStrategy,
    SessionController, SessionError, SessionOptions, SessionPhase,
};

const SETTLE: Duration = Duration::from_secs(5);

fn runtime_with(
    gateway: Arc<ScriptedGateway>,
    options: SessionOptions,
    seed: &[u64],
) -> SessionRuntime<ScriptedGateway> {
    let controller =
        SessionController::new(options, seed.iter().map(|&id| DataPoint::bare(id)).collect());
    SessionRuntime::new(gateway, controller)
}

fn offered_index(runtime: &SessionRuntime<ScriptedGateway>, id: u64) -> usize {
    runtime
        .controller()
        .state()
        .points_to_label()
        .iter()
        .position(|point| point.id == PointId(id))
        .expect("point offered")
}

#[test]
fn bootstrap_then_exploration_records_iterations() {
    let gateway = Arc::new(ScriptedGateway::new(3));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[1, 2, 3]);

    runtime.label_point(offered_index(&runtime, 1), 1).unwrap();
    runtime.label_point(offered_index(&runtime, 2), 0).unwrap();
    let events = runtime.settle(SETTLE);

    assert_eq!(runtime.controller().phase(), SessionPhase::Exploration);
    assert_eq!(gateway.submitted_ids(), vec![vec![1, 2]]);
    assert!(events.contains(&RuntimeEvent::SnapshotsRecorded(vec![0])));
    assert_eq!(runtime.controller().state().points_to_label().len(), 3);

    runtime.label_point(0, 1).unwrap();
    runtime.settle(SETTLE);
    runtime.label_point(0, 0).unwrap();
    runtime.settle(SETTLE);

    let view = runtime.view();
    assert_eq!(view.history_len, 3);
    assert_eq!(view.current_iteration, 2);
    assert_eq!(view.state.all_labeled_points().len(), 3);
    assert!(view.current_snapshot.is_some());
    assert_eq!(gateway.grid_calls(), 3);
    assert_eq!(gateway.grouped_grid_calls(), 0);
    assert_eq!(runtime.in_flight(), 0);
}

#[test]
fn failed_submission_keeps_labels_until_retry() {
    let gateway = Arc::new(ScriptedGateway::new(2));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[1]);
    gateway.queue_candidates(Err(GatewayError::ServerError("boom".to_string())));

    runtime.label_point(0, 1).unwrap();
    let events = runtime.settle(SETTLE);
    assert!(matches!(
        events.as_slice(),
        [RuntimeEvent::SubmissionFailed(SessionError::RequestFailed(_))]
    ));
    let view = runtime.view();
    assert!(view.awaiting_retry);
    assert_eq!(view.state.pending_batch().len(), 1);
    assert!(gateway.submitted_ids().is_empty());

    runtime.retry_submission().unwrap();
    runtime.settle(SETTLE);
    assert_eq!(gateway.submitted_ids(), vec![vec![1]]);
    assert!(runtime.view().state.pending_batch().is_empty());
    assert_eq!(runtime.controller().state().points_to_label().len(), 2);
    assert_eq!(runtime.retry_submission(), Err(SessionError::NothingToRetry));
}

#[test]
fn factorized_learner_fetches_grouped_grid() {
    let gateway = Arc::new(ScriptedGateway::new(1));
    let options = SessionOptions {
        learner: LearnerKind::Factorized,
        ..SessionOptions::default()
    };
    let mut runtime = runtime_with(gateway.clone(), options, &[1, 2]);
    runtime.label_point(0, 1).unwrap();
    runtime.label_point(0, 0).unwrap();
    runtime.settle(SETTLE);

    assert_eq!(gateway.grid_calls(), 1);
    assert_eq!(gateway.grouped_grid_calls(), 1);
    let snapshot = runtime.view().current_snapshot.expect("snapshot recorded");
    assert!(snapshot.grouped_grid_predictions.is_some());
}

#[test]
fn dropped_grid_is_reported_and_skipped() {
    let gateway = Arc::new(ScriptedGateway::new(2));
    gateway.fail_next_grid(GatewayError::Transport("reset".to_string()));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[1, 2]);
    runtime.label_point(0, 1).unwrap();
    runtime.label_point(0, 0).unwrap();
    let events = runtime.settle(SETTLE);

    assert!(events
        .iter()
        .any(|event| matches!(event, RuntimeEvent::SnapshotDropped { .. })));
    assert_eq!(runtime.view().history_len, 0);

    runtime.label_point(0, 1).unwrap();
    runtime.settle(SETTLE);
    assert_eq!(runtime.view().history_len, 1);
}

#[test]
fn filter_sampling_offers_a_bounded_page() {
    let gateway = Arc::new(ScriptedGateway::new(0));
    let options = SessionOptions {
        filter_page_size: 2,
        ..SessionOptions::default()
    };
    let mut runtime = runtime_with(gateway.clone(), options, &[1, 2]);
    gateway.queue_filter_reply(Ok((10..15).map(DataPoint::bare).collect()));

    runtime
        .request_filtered_points(vec![FilterPredicate::range("age", Some(20.0), Some(30.0))])
        .unwrap();
    let events = runtime.settle(SETTLE);
    assert_eq!(events, vec![RuntimeEvent::FilterResults { offered: 2 }]);
    assert_eq!(gateway.filter_requests().len(), 1);

    let view = runtime.view();
    assert_eq!(view.strategy, SamplingStrategy::Filter);
    let ids: Vec<u64> = view.state.points_to_label().iter().map(|point| point.id.0).collect();
    assert_eq!(ids, vec![10, 11]);

    runtime.set_sampling_strategy(SamplingStrategy::Random).unwrap();
    let ids: Vec<u64> = runtime
        .view()
        .state
        .points_to_label()
        .iter()
        .map(|point| point.id.0)
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn invalid_predicate_sends_nothing() {
    let gateway = Arc::new(ScriptedGateway::new(0));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[1]);
    let err = runtime
        .request_filtered_points(vec![FilterPredicate::range("age", Some(5.0), Some(1.0))])
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidPredicate { .. }));
    assert!(runtime.settle(SETTLE).is_empty());
    assert!(gateway.filter_requests().is_empty());
}

#[test]
fn specific_point_joins_the_candidates() {
    let gateway = Arc::new(ScriptedGateway::new(0));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[1]);

    runtime.request_specific_point(PointId(77)).unwrap();
    assert_eq!(runtime.settle(SETTLE), vec![RuntimeEvent::PointReceived(PointId(77))]);
    assert_eq!(
        runtime.request_specific_point(PointId(77)),
        Err(SessionError::DuplicatePoint { id: PointId(77) })
    );
    let offered = runtime.controller().state().points_to_label();
    assert_eq!(offered[1], DataPoint::new(77, vec![77.0]));
}

#[test]
fn empty_seed_fetches_candidates_through_random_strategy() {
    let gateway = Arc::new(ScriptedGateway::new(4));
    let mut runtime = runtime_with(gateway.clone(), SessionOptions::default(), &[]);
    runtime.set_sampling_strategy(SamplingStrategy::Random).unwrap();
    runtime.settle(SETTLE);

    assert_eq!(gateway.submitted_ids(), vec![Vec::<u64>::new()]);
    assert_eq!(runtime.controller().state().points_to_label().len(), 4);
    assert!(runtime.controller().state().all_labeled_points().is_empty());
}

#[test]
fn export_returns_backend_dataset() {
    let gateway = Arc::new(ScriptedGateway::new(0));
    let runtime = runtime_with(gateway, SessionOptions::default(), &[1]);
    assert!(runtime.export_labeled_dataset().unwrap().starts_with("id,label"));
}
