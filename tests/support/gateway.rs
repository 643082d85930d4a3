use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use labelloop::session::{
    BackendGateway, BinaryLabel, DataPoint, FilterPredicate, GatewayError, GridPrediction,
    LabeledPoint, PointId,
};

/// In-memory backend that answers from queued replies and records what it was sent.
pub struct ScriptedGateway {
    candidate_replies: Mutex<VecDeque<Result<Vec<DataPoint>, GatewayError>>>,
    filter_replies: Mutex<VecDeque<Result<Vec<DataPoint>, GatewayError>>>,
    grid_failures: Mutex<VecDeque<GatewayError>>,
    submissions: Mutex<Vec<Vec<LabeledPoint>>>,
    filters: Mutex<Vec<Vec<FilterPredicate>>>,
    grid_calls: AtomicU64,
    grouped_grid_calls: AtomicU64,
    next_fresh_id: AtomicU64,
    fresh_per_submission: usize,
}

impl ScriptedGateway {
    /// Every submission without a queued reply answers with `fresh_per_submission`
    /// never-seen points.
    pub fn new(fresh_per_submission: usize) -> Self {
        Self {
            candidate_replies: Mutex::new(VecDeque::new()),
            filter_replies: Mutex::new(VecDeque::new()),
            grid_failures: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            grid_calls: AtomicU64::new(0),
            grouped_grid_calls: AtomicU64::new(0),
            next_fresh_id: AtomicU64::new(1_000),
            fresh_per_submission,
        }
    }

    pub fn queue_candidates(&self, reply: Result<Vec<DataPoint>, GatewayError>) {
        self.candidate_replies.lock().unwrap().push_back(reply);
    }

    pub fn queue_filter_reply(&self, reply: Result<Vec<DataPoint>, GatewayError>) {
        self.filter_replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_next_grid(&self, err: GatewayError) {
        self.grid_failures.lock().unwrap().push_back(err);
    }

    /// Ids of every submitted batch, in arrival order.
    pub fn submitted_ids(&self) -> Vec<Vec<u64>> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.iter().map(|point| point.id().0).collect())
            .collect()
    }

    pub fn submitted_batches(&self) -> Vec<Vec<LabeledPoint>> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn filter_requests(&self) -> Vec<Vec<FilterPredicate>> {
        self.filters.lock().unwrap().clone()
    }

    pub fn grid_calls(&self) -> u64 {
        self.grid_calls.load(Ordering::SeqCst)
    }

    pub fn grouped_grid_calls(&self) -> u64 {
        self.grouped_grid_calls.load(Ordering::SeqCst)
    }

    fn fresh_points(&self) -> Vec<DataPoint> {
        (0..self.fresh_per_submission)
            .map(|_| DataPoint::bare(self.next_fresh_id.fetch_add(1, Ordering::SeqCst)))
            .collect()
    }

    fn grid(&self) -> Result<Vec<GridPrediction>, GatewayError> {
        if let Some(err) = self.grid_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok((0..4)
            .map(|id| GridPrediction {
                point_id: PointId(id),
                label: if id % 2 == 0 {
                    BinaryLabel::Positive
                } else {
                    BinaryLabel::Negative
                },
            })
            .collect())
    }
}

impl BackendGateway for ScriptedGateway {
    fn submit_labeled_points(&self, points: &[LabeledPoint]) -> Result<Vec<DataPoint>, GatewayError> {
        let reply = self.candidate_replies.lock().unwrap().pop_front();
        if !matches!(reply, Some(Err(_))) {
            self.submissions.lock().unwrap().push(points.to_vec());
        }
        reply.unwrap_or_else(|| Ok(self.fresh_points()))
    }

    fn submit_filter_predicates(
        &self,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<DataPoint>, GatewayError> {
        self.filters.lock().unwrap().push(predicates.to_vec());
        self.filter_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError> {
        self.grid_calls.fetch_add(1, Ordering::SeqCst);
        self.grid()
    }

    fn grouped_model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError> {
        self.grouped_grid_calls.fetch_add(1, Ordering::SeqCst);
        self.grid()
    }

    fn request_specific_point(&self, row_id: PointId) -> Result<DataPoint, GatewayError> {
        Ok(DataPoint::new(row_id.0, vec![row_id.0 as f64]))
    }

    fn labeled_dataset(&self) -> Result<String, GatewayError> {
        let labeled: usize = self.submissions.lock().unwrap().iter().map(Vec::len).sum();
        Ok(format!("id,label\n# {labeled} labeled point(s)\n"))
    }
}
