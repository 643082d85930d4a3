//! HTTP client for the learning backend.

use tracing::{debug, warn};
use url::Url;

use crate::config::{BackendSettings, ConfigError};
use crate::http_client::{self, RetryConfig};
use crate::session::{
    BackendGateway, DataPoint, FilterPredicate, GatewayError, GridPrediction, LabeledPoint,
    PointId,
};

use super::wire;

const LABELED_ENDPOINT: &str = "data-point-were-labeled";
const GROUPED_LABELED_ENDPOINT: &str = "tsm-data-point-were-labeled";
const FILTER_ENDPOINT: &str = "get-points-by-filtering";
const GRID_ENDPOINT: &str = "get-model-predictions-over-grid-point";
const GROUPED_GRID_ENDPOINT: &str = "get-tsm-predictions-over-grid-point";
const SPECIFIC_POINT_ENDPOINT: &str = "get-specific-point-to-label";
const LABELED_DATASET_ENDPOINT: &str = "get-labeled-dataset";

/// [`BackendGateway`] speaking the backend's form-encoded HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: Url,
    agent: ureq::Agent,
    retry: RetryConfig,
    max_response_bytes: usize,
    grouped_labels: bool,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, ConfigError> {
        let mut base_url = settings.base_url()?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            agent: http_client::agent(settings),
            retry: settings.retry.into(),
            max_response_bytes: settings.max_response_bytes,
            grouped_labels: false,
        })
    }

    /// Send label submissions to the grouped (per-variable) endpoint.
    pub fn with_grouped_labels(mut self, grouped: bool) -> Self {
        self.grouped_labels = grouped;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Transport(format!("Invalid endpoint {path}: {err}")))
    }

    /// Form POST; never retried since the backend is not idempotent for labels.
    fn post_form(&self, path: &str, field: &str, value: &str) -> Result<String, GatewayError> {
        let url = self.endpoint(path)?;
        debug!(%url, bytes = value.len(), "POST");
        let request = self.agent.post(url.as_str()).set("Accept", "application/json");
        match request.send_form(&[(field, value)]) {
            Ok(response) => self.read_body(response),
            Err(err) => Err(self.map_ureq_error(err)),
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, GatewayError> {
        let url = self.endpoint(path)?;
        http_client::retry_with_backoff(
            self.retry,
            || {
                debug!(%url, "GET");
                let mut request = self.agent.get(url.as_str()).set("Accept", "application/json");
                for (key, value) in query {
                    request = request.query(key, value);
                }
                match request.call() {
                    Ok(response) => self.read_body(response),
                    Err(err) => Err(self.map_ureq_error(err)),
                }
            },
            |err| {
                let retry = is_retryable(err);
                if retry {
                    warn!(%url, error = %err, "Backend read failed; retrying");
                }
                retry
            },
        )
    }

    fn map_ureq_error(&self, err: ureq::Error) -> GatewayError {
        match err {
            ureq::Error::Status(code, response) => {
                let body = self.read_body(response).unwrap_or_else(|err| err.to_string());
                map_status_error(code, body)
            }
            ureq::Error::Transport(err) => GatewayError::Transport(err.to_string()),
        }
    }

    fn read_body(&self, response: ureq::Response) -> Result<String, GatewayError> {
        let bytes = http_client::read_response_bytes(response, self.max_response_bytes)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::InvalidData => GatewayError::TooLarge(err.to_string()),
                _ => GatewayError::Transport(err.to_string()),
            })?;
        String::from_utf8(bytes).map_err(|err| GatewayError::Json(err.to_string()))
    }
}

impl BackendGateway for HttpBackend {
    fn submit_labeled_points(&self, points: &[LabeledPoint]) -> Result<Vec<DataPoint>, GatewayError> {
        let endpoint = if self.grouped_labels {
            GROUPED_LABELED_ENDPOINT
        } else {
            LABELED_ENDPOINT
        };
        let payload = wire::encode_labeled_points(points)?;
        let body = self.post_form(endpoint, "labeledPoints", &payload)?;
        wire::parse_points(&body)
    }

    fn submit_filter_predicates(
        &self,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<DataPoint>, GatewayError> {
        let payload = wire::encode_filters(predicates)?;
        let body = self.post_form(FILTER_ENDPOINT, "filters", &payload)?;
        wire::parse_points(&body)
    }

    fn model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError> {
        wire::parse_predictions(&self.get(GRID_ENDPOINT, &[])?)
    }

    fn grouped_model_predictions_over_grid(&self) -> Result<Vec<GridPrediction>, GatewayError> {
        wire::parse_predictions(&self.get(GROUPED_GRID_ENDPOINT, &[])?)
    }

    fn request_specific_point(&self, row_id: PointId) -> Result<DataPoint, GatewayError> {
        let body = self.get(SPECIFIC_POINT_ENDPOINT, &[("id", row_id.to_string())])?;
        wire::parse_single_point(&body)
    }

    fn labeled_dataset(&self) -> Result<String, GatewayError> {
        self.get(LABELED_DATASET_ENDPOINT, &[])
    }
}

fn map_status_error(code: u16, body: String) -> GatewayError {
    match code {
        400 => GatewayError::BadRequest(body),
        404 => GatewayError::NotFound(body),
        500..=599 => GatewayError::ServerError(body),
        _ => GatewayError::Transport(format!("HTTP {code}: {body}")),
    }
}

fn is_retryable(err: &GatewayError) -> bool {
    matches!(err, GatewayError::ServerError(_) | GatewayError::Transport(_))
}
