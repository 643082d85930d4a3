//! Runs a [`SessionController`] against a live [`BackendGateway`].
//!
//! Every backend request is executed on its own worker thread. Results come back over
//! an mpsc channel and are applied to the controller by [`SessionRuntime::poll`] or
//! [`SessionRuntime::wait`], so the controller keeps a single writer.

use std::sync::{
    Arc,
    mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::session::{
    BackendGateway, BackendRequest, DataPoint, FilterPredicate, GatewayError, GridKind,
    GridPrediction, GroupedAnswer, PointId, SamplingStrategy, SessionController, SessionError,
    SessionView, SnapshotResponse, SubmissionId,
};

enum BackendMessage {
    LabelsSubmitted {
        submission: SubmissionId,
        result: Result<Vec<DataPoint>, GatewayError>,
    },
    FiltersApplied(Result<Vec<DataPoint>, GatewayError>),
    PredictionsFetched {
        ticket: SubmissionId,
        kind: GridKind,
        result: Result<Vec<GridPrediction>, GatewayError>,
    },
    SpecificPointFetched {
        row_id: PointId,
        result: Result<DataPoint, GatewayError>,
    },
}

/// What changed after a backend reply was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    SubmissionAcknowledged {
        submission: SubmissionId,
        /// Candidates now offered for labeling.
        offered: usize,
    },
    /// The batch is back in the pending queue; call `retry_submission`.
    SubmissionFailed(SessionError),
    FilterResults {
        offered: usize,
    },
    SnapshotsRecorded(Vec<usize>),
    SnapshotDropped {
        ticket: SubmissionId,
        reason: String,
    },
    PointReceived(PointId),
    /// A reply the controller refused, such as a point it already tracks.
    Rejected(SessionError),
    RequestFailed(String),
}

pub struct SessionRuntime<G: BackendGateway + ?Sized + 'static> {
    gateway: Arc<G>,
    controller: SessionController,
    message_tx: Sender<BackendMessage>,
    message_rx: Receiver<BackendMessage>,
    in_flight: usize,
}

impl<G: BackendGateway + ?Sized + 'static> SessionRuntime<G> {
    pub fn new(gateway: Arc<G>, controller: SessionController) -> Self {
        let (message_tx, message_rx) = std::sync::mpsc::channel();
        Self {
            gateway,
            controller,
            message_tx,
            message_rx,
            in_flight: 0,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn view(&self) -> SessionView {
        self.controller.view()
    }

    /// Backend requests dispatched whose replies have not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn label_point(&mut self, point_index: usize, label: i64) -> Result<(), SessionError> {
        let requests = self.controller.label_point(point_index, label)?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn label_grouped_point(
        &mut self,
        point_index: usize,
        answer: GroupedAnswer,
    ) -> Result<(), SessionError> {
        let requests = self.controller.label_grouped_point(point_index, answer)?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn set_sampling_strategy(&mut self, strategy: SamplingStrategy) -> Result<(), SessionError> {
        let requests = self.controller.set_sampling_strategy(strategy)?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn request_filtered_points(
        &mut self,
        predicates: Vec<FilterPredicate>,
    ) -> Result<(), SessionError> {
        let requests = self.controller.request_filtered_points(predicates)?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn request_specific_point(&mut self, row_id: PointId) -> Result<(), SessionError> {
        let requests = self.controller.request_specific_point(row_id)?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn retry_submission(&mut self) -> Result<(), SessionError> {
        let requests = self.controller.retry_submission()?;
        self.dispatch(requests);
        Ok(())
    }

    pub fn previous_iteration(&mut self) -> usize {
        self.controller.previous_iteration()
    }

    pub fn next_iteration(&mut self) -> usize {
        self.controller.next_iteration()
    }

    /// Fetch the backend's auto-labeled dataset. Blocks the caller.
    pub fn export_labeled_dataset(&self) -> Result<String, GatewayError> {
        self.gateway.labeled_dataset()
    }

    /// Apply every reply that already arrived.
    pub fn poll(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        loop {
            match self.message_rx.try_recv() {
                Ok(message) => events.extend(self.apply(message)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Block until one reply arrives or `timeout` passes, then apply it and anything
    /// queued behind it.
    pub fn wait(&mut self, timeout: Duration) -> Vec<RuntimeEvent> {
        match self.message_rx.recv_timeout(timeout) {
            Ok(message) => {
                let mut events = self.apply(message);
                events.extend(self.poll());
                events
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Vec::new(),
        }
    }

    /// Keep applying replies, including follow-up requests they trigger, until nothing
    /// is in flight or `timeout` passes.
    pub fn settle(&mut self, timeout: Duration) -> Vec<RuntimeEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(in_flight = self.in_flight, "Backend replies still outstanding");
                break;
            }
            events.extend(self.wait(remaining));
        }
        events
    }

    fn dispatch(&mut self, requests: Vec<BackendRequest>) {
        for request in requests {
            self.in_flight += 1;
            let gateway = Arc::clone(&self.gateway);
            let tx = self.message_tx.clone();
            thread::spawn(move || {
                let _ = tx.send(execute(gateway.as_ref(), request));
            });
        }
    }

    fn apply(&mut self, message: BackendMessage) -> Vec<RuntimeEvent> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match message {
            BackendMessage::LabelsSubmitted { submission, result } => match result {
                Ok(candidates) => {
                    let requests = self.controller.submission_succeeded(candidates);
                    self.dispatch(requests);
                    vec![RuntimeEvent::SubmissionAcknowledged {
                        submission,
                        offered: self.controller.state().points_to_label().len(),
                    }]
                }
                Err(err) => {
                    vec![RuntimeEvent::SubmissionFailed(
                        self.controller.submission_failed(err.to_string()),
                    )]
                }
            },
            BackendMessage::FiltersApplied(result) => match result {
                Ok(points) => vec![RuntimeEvent::FilterResults {
                    offered: self.controller.receive_filtered_points(points),
                }],
                Err(err) => vec![RuntimeEvent::RequestFailed(err.to_string())],
            },
            BackendMessage::PredictionsFetched {
                ticket,
                kind,
                result,
            } => {
                let mut events = Vec::new();
                let appended = match result {
                    Ok(predictions) => self.controller.receive_prediction_snapshot(SnapshotResponse {
                        ticket,
                        kind,
                        predictions,
                    }),
                    Err(err) => {
                        events.push(RuntimeEvent::SnapshotDropped {
                            ticket,
                            reason: err.to_string(),
                        });
                        self.controller.snapshot_failed(ticket)
                    }
                };
                if !appended.is_empty() {
                    events.push(RuntimeEvent::SnapshotsRecorded(appended));
                }
                events
            }
            BackendMessage::SpecificPointFetched { row_id, result } => match result {
                Ok(point) => {
                    let id = point.id;
                    if id != row_id {
                        debug!(requested = %row_id, received = %id, "Backend answered with another row");
                    }
                    match self.controller.receive_candidates(vec![point]) {
                        Ok(()) => vec![RuntimeEvent::PointReceived(id)],
                        Err(err) => vec![RuntimeEvent::Rejected(err)],
                    }
                }
                Err(err) => vec![RuntimeEvent::RequestFailed(err.to_string())],
            },
        }
    }
}

fn execute<G: BackendGateway + ?Sized>(gateway: &G, request: BackendRequest) -> BackendMessage {
    match request {
        BackendRequest::SubmitLabels { submission, points } => BackendMessage::LabelsSubmitted {
            submission,
            result: gateway.submit_labeled_points(&points),
        },
        BackendRequest::SubmitFilters { predicates } => {
            BackendMessage::FiltersApplied(gateway.submit_filter_predicates(&predicates))
        }
        BackendRequest::FetchPredictions { ticket, kind } => BackendMessage::PredictionsFetched {
            ticket,
            kind,
            result: match kind {
                GridKind::Model => gateway.model_predictions_over_grid(),
                GridKind::Grouped => gateway.grouped_model_predictions_over_grid(),
            },
        },
        BackendRequest::FetchSpecificPoint { row_id } => BackendMessage::SpecificPointFetched {
            row_id,
            result: gateway.request_specific_point(row_id),
        },
    }
}
