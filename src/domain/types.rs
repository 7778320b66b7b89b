use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::site::Site;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// What the client hands to the analysis boundary for one site.
#[derive(Debug, Clone)]
pub struct ForageSubmission {
    pub image_base64: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<u32>,
}

impl ForageSubmission {
    pub fn for_site(site: &Site, jpeg: &[u8]) -> Self {
        Self {
            image_base64: STANDARD.encode(jpeg),
            lat: site.position.lat,
            lng: site.position.lng,
            radius_m: Some(site.radius.meters()),
        }
    }
}

/// Body of `POST /api/analyze` as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub image: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
}

impl From<&ForageSubmission> for AnalyzeRequest {
    fn from(submission: &ForageSubmission) -> Self {
        Self {
            image: submission.image_base64.clone(),
            lat: submission.lat,
            lng: submission.lng,
            radius: submission.radius_m,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
