use anyhow::{bail, Context, Result};
use reqwest::Response;
use serde::{Deserialize, Serialize};

use crate::domain::ForageSubmission;

const EXPERT_PROMPT: &str = r#"Du bist ein erfahrener Imkermeister und Landschaftsökologe.
Analysiere das Satellitenbild im Flugradius eines Bienenstocks an den Koordinaten: Breitengrad {lat}, Längengrad {lng}{radius}.

Beschreibe zuerst nur, was auf dem Bild tatsächlich zu erkennen ist (Wald, Felder, Wiesen, Siedlungen, Gewässer), und ergänze es danach mit deinem Wissen über die typische Vegetation und Landwirtschaft dieser Region.

Antworte kurz und stichpunktartig im Markdown-Format mit genau diesen Abschnitten:

**Futterquellen:**
* Hauptvegetationstypen und ihr Flächenanteil.
* Typische Trachtpflanzen der Region und ihr Nutzen (Nektar/Pollen/Honigtau).

**Risiken:**
* Mögliche Nachteile (z.B. Monokulturen, Pestizideinsatz, Industrie, große Wasserflächen, Trachtlücken).

**Fazit:**
* Kurze Zusammenfassung der Eignung des Standorts.

Schließe mit einer eigenen Zeile im Format **Bewertung:** X/10 ab, wobei 1 sehr schlecht und 10 ausgezeichnet bedeutet."#;

pub fn build_prompt(submission: &ForageSubmission) -> String {
    let radius = submission
        .radius_m
        .map(|meters| format!(", Flugradius {meters} Meter"))
        .unwrap_or_default();
    EXPERT_PROMPT
        .replace("{lat}", &submission.lat.to_string())
        .replace("{lng}", &submission.lng.to_string())
        .replace("{radius}", &radius)
}

pub fn build_request(submission: &ForageSubmission) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".into(),
            parts: vec![
                Part::Text {
                    text: build_prompt(submission),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/jpeg".into(),
                        data: submission.image_base64.clone(),
                    },
                },
            ],
        }],
    }
}

pub async fn parse_response(response: Response) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .unwrap_or(body);
        bail!("Gemini API returned {status}: {}", message.trim());
    }

    let completion: GenerateContentResponse = response
        .json()
        .await
        .context("Gemini response was not valid JSON")?;
    extract_text(completion)
}

pub fn extract_text(completion: GenerateContentResponse) -> Result<String> {
    let candidate = completion
        .candidates
        .into_iter()
        .next()
        .context("Gemini response did not contain any candidates")?;

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();

    if text.is_empty() {
        if let Some(reason) = candidate.finish_reason {
            bail!("Gemini returned no text (finish reason: {reason})");
        }
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}
