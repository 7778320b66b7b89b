use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    ai::ForageModel,
    domain::{AnalyzeResponse, ErrorBody, ForageSubmission},
};

use super::quota::{QuotaCounter, QuotaExceeded};

#[derive(Clone)]
pub struct ProxyState {
    pub model: Arc<dyn ForageModel>,
    pub quota: Arc<dyn QuotaCounter>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error("AI analysis failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Lenient view of the request body so missing fields map to a 400 with a
/// readable message instead of a generic extractor rejection.
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    image: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
}

impl AnalyzeBody {
    fn into_submission(self) -> Result<ForageSubmission, ProxyError> {
        let image = self
            .image
            .map(|image| image.trim().to_string())
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ProxyError::BadRequest("image is required".into()))?;

        let (lat, lng) = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => (lat, lng),
            _ => {
                return Err(ProxyError::BadRequest(
                    "lat and lng must be numbers".into(),
                ))
            }
        };
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(ProxyError::BadRequest(
                "lat/lng are outside the valid coordinate range".into(),
            ));
        }

        let radius_m = match self.radius {
            Some(radius) if radius.is_finite() && radius > 0.0 => Some(radius.round() as u32),
            Some(_) => {
                return Err(ProxyError::BadRequest(
                    "radius must be a positive number of meters".into(),
                ))
            }
            None => None,
        };

        Ok(ForageSubmission {
            image_base64: image,
            lat,
            lng,
            radius_m,
        })
    }
}

pub async fn analyze(
    State(state): State<ProxyState>,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ProxyError> {
    let Json(body) = payload.map_err(|rejection| {
        ProxyError::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    })?;
    let submission = body.into_submission()?;

    let before = state.quota.check().inspect_err(|err| {
        tracing::warn!(target: "proxy", limit = err.limit, "daily analysis limit reached");
    })?;

    tracing::info!(
        target: "proxy",
        lat = submission.lat,
        lng = submission.lng,
        radius_m = submission.radius_m,
        used = before.used,
        limit = before.limit,
        "forwarding analysis request"
    );

    let text = state.model.analyze(&submission).await.map_err(|err| {
        tracing::error!(target: "proxy", error = %format!("{err:#}"), "model call failed");
        ProxyError::Upstream(format!("{err:#}"))
    })?;

    let after = state.quota.record_success();
    tracing::info!(
        target: "proxy",
        used = after.used,
        limit = after.limit,
        chars = text.len(),
        "analysis served"
    );
    Ok(Json(AnalyzeResponse { text }))
}

pub async fn method_not_allowed() -> ProxyError {
    ProxyError::MethodNotAllowed
}

pub async fn health() -> &'static str {
    "ok"
}
