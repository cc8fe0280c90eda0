//! HTTP surface: health probe, prediction and bundle reload

use crate::error::PipelineError;
use crate::metrics::ServingMetrics;
use crate::models::{BundleSelector, InferenceEngine};
use crate::registry::MetricOrder;
use crate::types::Decision;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub metrics: Arc<ServingMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>, metrics: Arc<ServingMetrics>) -> Self {
        Self { engine, metrics }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/admin/reload", post(reload))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Bundle to switch to; an empty body reloads the configured default
#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub order: Option<MetricOrder>,
}

impl ReloadRequest {
    fn selector(&self) -> Option<BundleSelector> {
        match (&self.run_id, &self.metric) {
            (Some(run_id), _) => Some(BundleSelector::Run(run_id.clone())),
            (None, Some(metric)) => Some(BundleSelector::Best {
                metric: metric.clone(),
                order: self.order.unwrap_or_default(),
            }),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub model_version: String,
    pub features: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// A pipeline error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            PipelineError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::RunNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::CorruptArtifact(_)
            | PipelineError::NotFitted(_)
            | PipelineError::Schema(_)
            | PipelineError::InvalidTrainingData(_)
            | PipelineError::Io(_)
            | PipelineError::Csv(_)
            | PipelineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
        model_version: state.engine.current().map(|b| b.run_id.clone()),
    })
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Decision>, ApiError> {
    state.metrics.record_request();
    let start = Instant::now();

    let result = payload
        .map_err(|rejection| PipelineError::InvalidRecord(rejection.body_text()))
        .and_then(|Json(value)| match value {
            Value::Object(map) => state.engine.predict(&map),
            other => Err(PipelineError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
        });

    match result {
        Ok(decision) => {
            state.metrics.record_prediction(
                start.elapsed(),
                decision.probability,
                decision.label,
                decision.risk_level,
            );
            Ok(Json(decision))
        }
        Err(e) => {
            state.metrics.record_failure(e.kind());
            match &e {
                PipelineError::InvalidRecord(_) | PipelineError::ModelNotLoaded => {
                    warn!(error = %e, kind = e.kind(), "Prediction rejected")
                }
                _ => error!(error = %e, kind = e.kind(), "Prediction failed"),
            }
            Err(ApiError(e))
        }
    }
}

async fn reload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReloadResponse>, ApiError> {
    let request: ReloadRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ReloadRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PipelineError::InvalidRecord(format!("bad reload request: {}", e)))?
    };

    let selector = request.selector();
    let engine = Arc::clone(&state.engine);
    // bundle decoding and validation is blocking file and CPU work
    let loaded = tokio::task::spawn_blocking(move || engine.reload(selector.as_ref()))
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;

    match loaded {
        Ok(bundle) => {
            state.metrics.record_reload();
            info!(run_id = %bundle.run_id, "Bundle reloaded via admin endpoint");
            Ok(Json(ReloadResponse {
                status: "reloaded".to_string(),
                model_version: bundle.run_id.clone(),
                features: bundle.vectorizer.len(),
            }))
        }
        Err(e) => {
            state.metrics.record_failure(e.kind());
            Err(ApiError(e))
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inference::tests::{bundle, engine};
    use crate::store::ArtifactStore;
    use crate::types::RiskLevel;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn state(dir: &tempfile::TempDir) -> AppState {
        AppState::new(Arc::new(engine(dir)), Arc::new(ServingMetrics::new()))
    }

    #[tokio::test]
    async fn test_health_before_any_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let Json(body) = health(State(state(&dir))).await;
        assert_eq!(body.status, "running");
        assert_eq!(body.model_version, None);
    }

    #[tokio::test]
    async fn test_predict_without_bundle_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let err = predict(State(state.clone()), Ok(Json(json!({"amount": 10.0}))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.metrics.failures()["model_not_loaded"], 1);
    }

    #[tokio::test]
    async fn test_predict_scores_record() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.engine.install(bundle("run-a"));

        let Json(decision) = predict(
            State(state.clone()),
            Ok(Json(json!({
                "transaction_id": 42,
                "merchant_category": "grocery",
                "amount": 900,
                "unexpected": "ignored"
            }))),
        )
        .await
        .unwrap();

        assert!(decision.label);
        assert_eq!(decision.record_id.as_deref(), Some("42"));
        assert_eq!(decision.model_version.as_deref(), Some("run-a"));
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert_eq!(state.metrics.predictions.load(Ordering::Relaxed), 1);

        let body = serde_json::to_value(&decision).unwrap();
        for key in ["label", "probability", "risk_level", "model_version", "record_id"] {
            assert!(body.get(key).is_some(), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_predict_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.engine.install(bundle("run-a"));

        let err = predict(State(state), Ok(Json(json!([1, 2, 3]))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.0.kind(), "invalid_record");
    }

    #[tokio::test]
    async fn test_reload_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let store = state.engine.loader().store();
        store.save_bundle(&bundle("run-a")).unwrap();
        store.save_bundle(&bundle("run-b")).unwrap();

        let Json(resp) = reload(State(state.clone()), Bytes::new()).await.unwrap();
        assert_eq!(resp.model_version, "run-a");

        let Json(resp) = reload(State(state.clone()), Bytes::from_static(br#"{"run_id":"run-b"}"#))
            .await
            .unwrap();
        assert_eq!(resp.model_version, "run-b");

        let err = reload(State(state.clone()), Bytes::from_static(br#"{"run_id":"missing"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.engine.current().unwrap().run_id, "run-b");

        let err = reload(State(state), Bytes::from_static(b"{not json"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_per_error_kind() {
        let cases = [
            (
                PipelineError::InvalidRecord("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::DimensionMismatch {
                    expected: 3,
                    actual: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::ModelNotLoaded, StatusCode::SERVICE_UNAVAILABLE),
            (
                PipelineError::CorruptArtifact("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PipelineError::NotFitted("model"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (PipelineError::RunNotFound("r".into()), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_reload_request_selector() {
        assert_eq!(ReloadRequest::default().selector(), None);

        let by_run: ReloadRequest = serde_json::from_str(r#"{"run_id":"abc"}"#).unwrap();
        assert_eq!(
            by_run.selector(),
            Some(BundleSelector::Run("abc".to_string()))
        );

        let by_metric: ReloadRequest =
            serde_json::from_str(r#"{"metric":"roc_auc","order":"descending"}"#).unwrap();
        assert_eq!(
            by_metric.selector(),
            Some(BundleSelector::Best {
                metric: "roc_auc".to_string(),
                order: MetricOrder::Descending
            })
        );
    }
}
